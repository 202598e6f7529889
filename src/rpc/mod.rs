//! Sun-RPC (RFC 5531) message envelope: call/reply framing around the
//! NFSv3/v4 procedure payloads, independent of the record-marking layer in
//! [`framer`].

pub mod framer;

use crate::error::{Error, Result};
use crate::xdr::{Decoder, Encoder};

pub const RPC_VERSION: u32 = 2;

pub const AUTH_NULL: u32 = 0;
pub const AUTH_SYS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStat {
    Success,
    ProgUnavail,
    ProgMismatch,
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

impl AcceptStat {
    pub fn code(self) -> u32 {
        match self {
            AcceptStat::Success => 0,
            AcceptStat::ProgUnavail => 1,
            AcceptStat::ProgMismatch => 2,
            AcceptStat::ProcUnavail => 3,
            AcceptStat::GarbageArgs => 4,
            AcceptStat::SystemErr => 5,
        }
    }
}

/// A credential/verifier pair as carried on the wire. AUTH_SYS bodies are
/// accepted but treated identically to AUTH_NULL: their contents are never
/// consulted for access control.
#[derive(Debug, Clone)]
pub struct OpaqueAuth {
    pub flavor: u32,
    pub body: Vec<u8>,
}

impl OpaqueAuth {
    pub fn null() -> Self {
        OpaqueAuth { flavor: AUTH_NULL, body: Vec::new() }
    }

    pub fn decode(dec: &mut Decoder) -> Result<Self> {
        let flavor = dec.u32()?;
        let body = dec.opaque(400)?;
        Ok(OpaqueAuth { flavor, body })
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.u32(self.flavor);
        enc.opaque(&self.body);
    }
}

/// A decoded CALL message header: the xid, program/version/procedure
/// selector, and credential. The procedure-specific argument bytes follow
/// immediately after this header in the fragment buffer and are left for
/// the dispatcher to decode once a handler is selected.
#[derive(Debug, Clone)]
pub struct CallHeader {
    pub xid: u32,
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}

const MSG_TYPE_CALL: u32 = 0;
const MSG_TYPE_REPLY: u32 = 1;

impl CallHeader {
    /// Parses the RPC envelope from the start of a reassembled message.
    /// Returns the header plus the decoder positioned at the first byte of
    /// the procedure-specific arguments.
    pub fn decode(dec: &mut Decoder) -> Result<Self> {
        let xid = dec.u32()?;
        let msg_type = dec.u32()?;
        if msg_type != MSG_TYPE_CALL {
            return Err(Error::rpc(format!("expected CALL (0), got msg_type {msg_type}")));
        }
        let rpcvers = dec.u32()?;
        let prog = dec.u32()?;
        let vers = dec.u32()?;
        let proc_ = dec.u32()?;
        let cred = OpaqueAuth::decode(dec)?;
        let verf = OpaqueAuth::decode(dec)?;
        Ok(CallHeader { xid, rpcvers, prog, vers, proc: proc_, cred, verf })
    }
}

/// Builds the standard accepted-reply preamble (xid, REPLY, MSG_ACCEPTED,
/// null verifier, accept_stat) ahead of any procedure-specific payload.
pub fn encode_accepted_preamble(enc: &mut Encoder, xid: u32, stat: AcceptStat) {
    enc.u32(xid);
    enc.u32(MSG_TYPE_REPLY);
    enc.u32(0); // reply_stat = MSG_ACCEPTED
    OpaqueAuth::null().encode(enc);
    enc.u32(stat.code());
}

/// Builds a full reply for non-SUCCESS accept_stat values that carry no
/// further payload (PROG_UNAVAIL, PROC_UNAVAIL, GARBAGE_ARGS, SYSTEM_ERR).
pub fn encode_accepted_error(xid: u32, stat: AcceptStat) -> Vec<u8> {
    assert_ne!(stat, AcceptStat::Success);
    let mut enc = Encoder::new();
    encode_accepted_preamble(&mut enc, xid, stat);
    enc.into_bytes()
}

/// Builds a PROG_MISMATCH reply, which additionally carries the low/high
/// supported version numbers.
pub fn encode_prog_mismatch(xid: u32, low: u32, high: u32) -> Vec<u8> {
    let mut enc = Encoder::new();
    encode_accepted_preamble(&mut enc, xid, AcceptStat::ProgMismatch);
    enc.u32(low);
    enc.u32(high);
    enc.into_bytes()
}

/// Builds an RPC_MISMATCH rejected reply for unsupported `rpcvers`.
pub fn encode_rpc_mismatch(xid: u32, low: u32, high: u32) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.u32(xid);
    enc.u32(MSG_TYPE_REPLY);
    enc.u32(1); // reply_stat = MSG_DENIED
    enc.u32(0); // reject_stat = RPC_MISMATCH
    enc.u32(low);
    enc.u32(high);
    enc.into_bytes()
}
