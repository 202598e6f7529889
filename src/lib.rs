//! An NFSv4.0/v3 server built around a pluggable VFS contract. The crate is
//! organized leaf-to-root: XDR codec, RPC framer, message layer, VFS
//! contract, session state, NFSv3 handlers, NFSv4 COMPOUND engine, server
//! loop.

pub mod attrs;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod nfsv3;
pub mod nfsv4;
pub mod rpc;
pub mod server;
pub mod session;
pub mod vfs;
pub mod xdr;

pub use config::Config;
pub use error::{Error, Result};
pub use server::handle_forever;
