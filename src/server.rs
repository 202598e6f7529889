//! The server loop: one acceptor task, one handler task per connection,
//! strictly sequential request handling within a connection. COMPOUND
//! evaluation is linear by construction, so a connection gains nothing
//! from intra-connection concurrency and is handled by a single
//! read-dispatch-write loop rather than overlapping tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::error::Result;
use crate::rpc::framer;
use crate::session::SessionState;
use crate::vfs::Vfs;

/// Runs the accept loop until `shutdown` resolves. Existing connections run
/// to completion or transport failure; no new connections are accepted
/// once `shutdown` fires.
pub async fn handle_forever(
    listener: TcpListener,
    vfs: Arc<dyn Vfs>,
    config: Arc<Config>,
    shutdown: impl std::future::Future<Output = ()>,
) -> std::io::Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                socket.set_nodelay(true)?;
                tracing::info!(%peer, "accepted connection");
                let vfs = vfs.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, vfs.as_ref(), &config).await {
                        tracing::error!(%peer, error = %e, "connection terminated");
                    }
                });
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

/// One connection's lifetime: read a message, dispatch it, write the
/// reply, repeat, until the client closes the stream or a transport error
/// occurs. `session.clean_up()` runs on every exit path, including a panic
/// unwinding out of `connection_loop` mid-request: the loop is polled
/// behind `catch_unwind` so the open files in `session` are still closed
/// before the panic is resumed.
async fn handle_connection(mut socket: TcpStream, vfs: &dyn Vfs, config: &Config) -> Result<()> {
    let mut session = SessionState::new();
    let outcome = AssertUnwindSafe(connection_loop(&mut socket, &mut session, vfs, config))
        .catch_unwind()
        .await;
    session.clean_up().await;
    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn connection_loop(
    socket: &mut TcpStream,
    session: &mut SessionState,
    vfs: &dyn Vfs,
    config: &Config,
) -> Result<()> {
    loop {
        let message = match framer::read_message(socket, config.fragment_cap as usize).await? {
            Some(m) => m,
            None => return Ok(()), // clean client-initiated close
        };
        let reply = crate::dispatch::handle_message(&message, session, vfs).await?;
        framer::write_message(socket, &reply).await?;
    }
}
