//! CLI entry point. Constructs one VFS and one config, then hands both to
//! `nfsd4::handle_forever`. Exit codes: 0 on clean shutdown (Ctrl-C),
//! non-zero on bind failure.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;

use nfsd4::config::{Cli, Config};
use nfsd4::vfs::memory::InMemoryVfs;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let config = match Config::resolve(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.default_filter())),
        )
        .init();

    let listener = match TcpListener::bind(config.listen).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %config.listen, error = %e, "failed to bind listen address");
            return std::process::ExitCode::FAILURE;
        }
    };
    tracing::info!(addr = %config.listen, "nfsd4 listening");

    let vfs: Arc<dyn nfsd4::vfs::Vfs> = Arc::new(InMemoryVfs::new());
    let config = Arc::new(config);

    match nfsd4::handle_forever(listener, vfs, config, shutdown_signal()).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server loop exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
