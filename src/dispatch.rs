//! The message layer: validates the RPC envelope read off one reassembled
//! message and routes the remaining bytes to the v3 or v4 procedure
//! dispatcher.

use crate::error::{Error, Result};
use crate::nfsv3;
use crate::nfsv4;
use crate::rpc::{self, AcceptStat, CallHeader};
use crate::session::SessionState;
use crate::vfs::Vfs;
use crate::xdr::{Decoder, Encoder};

const NFS_PROGRAM: u32 = 100003;

/// Handles one reassembled RPC message and returns the full reply bytes,
/// ready to hand to the framer's write path.
pub async fn handle_message(
    message: &[u8],
    session: &mut SessionState,
    vfs: &dyn Vfs,
) -> Result<Vec<u8>> {
    let mut dec = Decoder::new(message);
    let header = CallHeader::decode(&mut dec)?;

    if header.rpcvers != rpc::RPC_VERSION {
        return Ok(rpc::encode_rpc_mismatch(header.xid, rpc::RPC_VERSION, rpc::RPC_VERSION));
    }
    if header.prog != NFS_PROGRAM {
        return Ok(rpc::encode_accepted_error(header.xid, AcceptStat::ProgUnavail));
    }
    if header.vers != nfsv3::VERSION && header.vers != nfsv4::VERSION {
        return Ok(rpc::encode_prog_mismatch(header.xid, nfsv3::VERSION, nfsv4::VERSION));
    }

    tracing::debug!(xid = header.xid, vers = header.vers, proc = header.proc, "dispatching rpc call");

    let dispatched = if header.vers == nfsv4::VERSION {
        nfsv4::handle_compound(&mut dec, session, vfs).await.map(Some)
    } else {
        nfsv3::dispatch(header.proc, &mut dec, vfs).await
    };

    // Malformed procedure arguments are an RPC-level GARBAGE_ARGS reply, not
    // a transport-fatal error: the connection stays open.
    let body = match dispatched {
        Ok(Some(body)) => body,
        Ok(None) => {
            tracing::warn!(xid = header.xid, proc = header.proc, "unsupported procedure");
            return Ok(rpc::encode_accepted_error(header.xid, AcceptStat::ProcUnavail));
        }
        Err(Error::Xdr(msg)) => {
            tracing::warn!(xid = header.xid, error = %msg, "garbage arguments");
            return Ok(rpc::encode_accepted_error(header.xid, AcceptStat::GarbageArgs));
        }
        Err(other) => return Err(other),
    };

    let mut enc = Encoder::new();
    rpc::encode_accepted_preamble(&mut enc, header.xid, AcceptStat::Success);
    enc.raw(&body);
    Ok(enc.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::OpaqueAuth;
    use crate::vfs::memory::InMemoryVfs;

    fn encode_call(xid: u32, vers: u32, proc_num: u32, body: impl FnOnce(&mut Encoder)) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.u32(xid);
        enc.u32(0); // CALL
        enc.u32(rpc::RPC_VERSION);
        enc.u32(NFS_PROGRAM);
        enc.u32(vers);
        enc.u32(proc_num);
        OpaqueAuth::null().encode(&mut enc);
        OpaqueAuth::null().encode(&mut enc);
        body(&mut enc);
        enc.into_bytes()
    }

    #[tokio::test]
    async fn unsupported_version_replies_prog_mismatch() {
        let vfs = InMemoryVfs::new();
        let mut session = SessionState::new();
        let message = encode_call(1, 2, 0, |_| {});
        let reply = handle_message(&message, &mut session, &vfs).await.unwrap();
        let mut dec = Decoder::new(&reply);
        let _xid = dec.u32().unwrap();
        let _msg_type = dec.u32().unwrap();
        let _reply_stat = dec.u32().unwrap();
        let _flavor = dec.u32().unwrap();
        let _body = dec.opaque(400).unwrap();
        let accept_stat = dec.u32().unwrap();
        assert_eq!(accept_stat, AcceptStat::ProgMismatch.code());
    }

    #[tokio::test]
    async fn v3_null_replies_ok_with_empty_body() {
        let vfs = InMemoryVfs::new();
        let mut session = SessionState::new();
        let message = encode_call(7, 3, nfsv3::proc_::NULL, |_| {});
        let reply = handle_message(&message, &mut session, &vfs).await.unwrap();
        let mut dec = Decoder::new(&reply);
        assert_eq!(dec.u32().unwrap(), 7); // xid
        let _msg_type = dec.u32().unwrap();
        let _reply_stat = dec.u32().unwrap();
        let _flavor = dec.u32().unwrap();
        let _body = dec.opaque(400).unwrap();
        let accept_stat = dec.u32().unwrap();
        assert_eq!(accept_stat, AcceptStat::Success.code());
        assert!(dec.is_empty());
    }
}
