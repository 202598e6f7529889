//! The NFSv4.0 COMPOUND engine: a linear interpreter over a client-supplied
//! operation list, sharing one mutable [`SessionState`] across every op in
//! the request and short-circuiting on the first non-OK status.

pub mod ops;
pub mod status;

use crate::error::{Error, Result};
use crate::session::SessionState;
use crate::vfs::Vfs;
use crate::xdr::{Decoder, Encoder};

pub const PROGRAM: u32 = 100003;
pub const VERSION: u32 = 4;

pub mod opcode {
    pub const ACCESS: u32 = 3;
    pub const CLOSE: u32 = 4;
    pub const CREATE: u32 = 6;
    pub const GETATTR: u32 = 9;
    pub const GETFH: u32 = 10;
    pub const LOOKUP: u32 = 15;
    pub const OPEN: u32 = 18;
    pub const PUTFH: u32 = 22;
    pub const PUTROOTFH: u32 = 24;
    pub const READ: u32 = 25;
    pub const READDIR: u32 = 26;
    pub const REMOVE: u32 = 28;
    pub const RENEW: u32 = 30;
    pub const RESTOREFH: u32 = 31;
    pub const SAVEFH: u32 = 32;
    pub const SECINFO: u32 = 33;
    pub const SETATTR: u32 = 34;
    pub const SETCLIENTID: u32 = 35;
    pub const SETCLIENTID_CONFIRM: u32 = 36;
    pub const WRITE: u32 = 38;
    pub const EXCHANGE_ID: u32 = 42;
}

/// Decodes and executes one COMPOUND request, returning the fully encoded
/// NFSv4 reply body (status, tag, resarray) ready to follow the RPC accept
/// preamble. `vfs` is shared across every connection; `session` is this
/// connection's private state.
pub async fn handle_compound(
    dec: &mut Decoder,
    session: &mut SessionState,
    vfs: &dyn Vfs,
) -> Result<Vec<u8>> {
    let tag = dec.string(128)?;
    let _minorversion = dec.u32()?;
    let numops = dec.u32()?;

    let mut results: Vec<(u32, u32, Vec<u8>)> = Vec::new();
    let mut last_status = status::NFS4_OK;

    for _ in 0..numops {
        let opcode = dec.u32()?;
        let (op_status, resok) = match ops::dispatch(opcode, dec, session, vfs).await {
            Ok(pair) => pair,
            Err(Error::Nfs4(code, _msg)) => (code, Vec::new()),
            Err(other) => return Err(other),
        };
        tracing::debug!(opcode, status = op_status, "nfsv4 op executed");
        last_status = op_status;
        results.push((opcode, op_status, resok));
        if op_status != status::NFS4_OK {
            break;
        }
    }

    let mut enc = Encoder::new();
    enc.u32(last_status);
    enc.string(&tag);
    enc.u32(results.len() as u32);
    for (opcode, op_status, resok) in results {
        enc.u32(opcode);
        enc.u32(op_status);
        enc.raw(&resok);
    }
    Ok(enc.into_bytes())
}
