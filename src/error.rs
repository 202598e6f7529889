use thiserror::Error;

/// Crate-wide error taxonomy. The server loop uses the variant to decide
/// whether a connection is still usable: `Io` and oversize `Xdr` errors are
/// connection-fatal, `Rpc` mismatches are answered with the matching
/// accepted/rejected reply and the connection stays open.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed xdr: {0}")]
    Xdr(String),

    #[error("rpc protocol mismatch: {0}")]
    Rpc(String),

    /// An error already resolved to a specific NFSv4 status code, used
    /// where the point of failure (e.g. attribute decoding) knows the
    /// right status better than a generic `Io`/`Xdr` classification would.
    #[error("nfs4 error {0}: {1}")]
    Nfs4(u32, String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn xdr(msg: impl Into<String>) -> Self {
        Error::Xdr(msg.into())
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Error::Rpc(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
