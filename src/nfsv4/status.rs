//! NFSv4 status codes: the subset of RFC 7530's `nfsstat4` this engine
//! actually returns, not the full enumeration.

pub const NFS4_OK: u32 = 0;
pub const NFS4ERR_PERM: u32 = 1;
pub const NFS4ERR_NOENT: u32 = 2;
pub const NFS4ERR_IO: u32 = 5;
pub const NFS4ERR_ACCESS: u32 = 13;
pub const NFS4ERR_EXIST: u32 = 17;
pub const NFS4ERR_NOTDIR: u32 = 20;
pub const NFS4ERR_INVAL: u32 = 22;
pub const NFS4ERR_BADHANDLE: u32 = 10001;
pub const NFS4ERR_NOTSUPP: u32 = 10004;
pub const NFS4ERR_ATTRNOTSUPP: u32 = 10032;
pub const NFS4ERR_CLID_INUSE: u32 = 10017;
pub const NFS4ERR_SERVERFAULT: u32 = 10006;
pub const NFS4ERR_OP_ILLEGAL: u32 = 10044;
pub const NFS4ERR_NOFILEHANDLE: u32 = 10020;
pub const NFS4ERR_BAD_STATEID: u32 = 10025;

/// A bare status code, used where a helper needs to hand its caller a
/// terminal op status without also constructing an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u32);
