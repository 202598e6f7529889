//! Runs `nfsd4` against the in-memory VFS, for manual testing with a real
//! NFS client (`mount -t nfs -o vers=4,port=2049,tcp 127.0.0.1:/ /mnt`).
//! Constructs one concrete backend, prints where it's rooted, runs.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;

use nfsd4::config::{Cli, Config};
use nfsd4::vfs::memory::InMemoryVfs;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::resolve(cli).expect("invalid configuration");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.default_filter()))
        .init();

    let listener = TcpListener::bind(config.listen).await.expect("failed to bind listen address");
    println!("nfsd4-memory-demo listening on {}, backed by an in-memory filesystem", config.listen);

    let vfs: Arc<dyn nfsd4::vfs::Vfs> = Arc::new(InMemoryVfs::new());
    let config = Arc::new(config);

    nfsd4::handle_forever(listener, vfs, config, async {
        let _ = signal::ctrl_c().await;
    })
    .await
    .expect("server loop exited with an error");
}
