//! NFSv4 attribute bitmap and value codec: an attribute-id enumeration, a
//! per-id encode/decode function, and a builder that sorts ids ascending
//! and composes their encodings. Not a uniform type, since attribute
//! payloads are irreducibly heterogeneous in both shape and width.

use crate::error::{Error, Result};
use crate::vfs::{FileInfo, VfsError};
use crate::xdr::{Decoder, Encoder};

/// Every attribute id this engine understands, in ascending order — the
/// order both GETATTR results and SETATTR requests must follow on the
/// wire.
pub const SUPPORTED_IDS: &[u32] = &[
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 19, 20, 33, 35, 36, 37, 41, 45, 47, 52, 53, 55,
];

pub const ATTR_SUPPORTED_ATTRS: u32 = 0;
pub const ATTR_TYPE: u32 = 1;
pub const ATTR_FH_EXPIRE_TYPE: u32 = 2;
pub const ATTR_CHANGE: u32 = 3;
pub const ATTR_SIZE: u32 = 4;
pub const ATTR_LINK_SUPPORT: u32 = 5;
pub const ATTR_SYMLINK_SUPPORT: u32 = 6;
pub const ATTR_NAMED_ATTR: u32 = 7;
pub const ATTR_FSID: u32 = 8;
pub const ATTR_UNIQUE_HANDLES: u32 = 9;
pub const ATTR_LEASE_TIME: u32 = 10;
pub const ATTR_RDATTR_ERROR: u32 = 11;
pub const ATTR_ACLSUPPORT: u32 = 13;
pub const ATTR_FILEHANDLE: u32 = 19;
pub const ATTR_FILEID: u32 = 20;
pub const ATTR_MODE: u32 = 33;
pub const ATTR_NUMLINKS: u32 = 35;
pub const ATTR_OWNER: u32 = 36;
pub const ATTR_OWNER_GROUP: u32 = 37;
pub const ATTR_RAWDEV: u32 = 41;
pub const ATTR_SPACE_USED: u32 = 45;
pub const ATTR_TIME_ACCESS: u32 = 47;
pub const ATTR_TIME_METADATA: u32 = 52;
pub const ATTR_TIME_MODIFY: u32 = 53;
pub const ATTR_MOUNTED_ON_FILEID: u32 = 55;

const NF4REG: u32 = 1;
const NF4DIR: u32 = 2;
const FH4_VOLATILE_ANY: u32 = 0x00000002;

/// Reads a `bitmap4` and returns it as the set of attribute ids it names.
pub fn decode_bitmap(dec: &mut Decoder) -> Result<Vec<u32>> {
    let words = dec.bitmap(8)?;
    let mut ids = Vec::new();
    for (word_idx, word) in words.iter().enumerate() {
        for bit in 0..32 {
            if word & (1 << bit) != 0 {
                ids.push((word_idx as u32) * 32 + bit);
            }
        }
    }
    Ok(ids)
}

/// Encodes a set of attribute ids back into `bitmap4` words.
pub fn encode_bitmap(enc: &mut Encoder, ids: &[u32]) {
    let words_needed = ids.iter().map(|id| id / 32 + 1).max().unwrap_or(0) as usize;
    let mut words = vec![0u32; words_needed];
    for id in ids {
        let word = (*id / 32) as usize;
        let bit = id % 32;
        words[word] |= 1 << bit;
    }
    enc.bitmap(&words);
}

/// Context needed to produce a value for any supported attribute id.
pub struct AttrContext<'a> {
    pub handle: &'a [u8],
    pub info: &'a FileInfo,
}

/// Computes `requested ∩ supported` and writes `{bitmap(ret), values}` for
/// every id in that intersection, in ascending order.
pub fn encode_attrs(requested: &[u32], ctx: &AttrContext) -> (Vec<u32>, Vec<u8>) {
    let mut returned = Vec::new();
    let mut values = Encoder::new();
    for id in SUPPORTED_IDS {
        if !requested.contains(id) {
            continue;
        }
        if encode_one(*id, ctx, &mut values) {
            returned.push(*id);
        }
    }
    (returned, values.into_bytes())
}

fn encode_one(id: u32, ctx: &AttrContext, enc: &mut Encoder) -> bool {
    let info = ctx.info;
    match id {
        ATTR_SUPPORTED_ATTRS => encode_bitmap(enc, SUPPORTED_IDS),
        ATTR_TYPE => enc.u32(if info.is_directory { NF4DIR } else { NF4REG }),
        ATTR_FH_EXPIRE_TYPE => enc.u32(FH4_VOLATILE_ANY),
        ATTR_CHANGE => enc.u64(((info.mtime.seconds as u64) << 32) | info.mtime.nanos as u64),
        ATTR_SIZE => enc.u64(info.size),
        ATTR_LINK_SUPPORT => enc.bool(false),
        ATTR_SYMLINK_SUPPORT => enc.bool(false),
        ATTR_NAMED_ATTR => enc.bool(false),
        ATTR_FSID => {
            enc.u64(1);
            enc.u64(0);
        }
        ATTR_UNIQUE_HANDLES => enc.bool(true),
        ATTR_LEASE_TIME => enc.u32(0),
        ATTR_RDATTR_ERROR => enc.i32(0),
        ATTR_ACLSUPPORT => enc.u32(0),
        ATTR_FILEHANDLE => enc.opaque(ctx.handle),
        ATTR_FILEID => enc.u64(info.fileid),
        ATTR_MODE => enc.u32(info.mode & 0o7777),
        ATTR_NUMLINKS => enc.u32(info.num_links),
        ATTR_OWNER => enc.string("0"),
        ATTR_OWNER_GROUP => enc.string("0"),
        ATTR_RAWDEV => {
            enc.u32(0);
            enc.u32(0);
        }
        ATTR_SPACE_USED => enc.u64(info.size),
        ATTR_TIME_ACCESS => encode_time(enc, info.atime),
        ATTR_TIME_METADATA => encode_time(enc, info.ctime),
        ATTR_TIME_MODIFY => encode_time(enc, info.mtime),
        ATTR_MOUNTED_ON_FILEID => enc.u64(info.fileid),
        _ => return false,
    }
    true
}

fn encode_time(enc: &mut Encoder, t: crate::vfs::FileTime) {
    enc.i64(t.seconds);
    enc.u32(t.nanos);
}

/// Attribute changes a SETATTR call decoded from the wire. Only {size,
/// mode, owner, owner_group} are writable; owner/owner_group are accepted
/// (so the value stream parses) but have no effect, since the VFS contract
/// exposes `Chmod` and not `Chown`.
#[derive(Default)]
pub struct WriteAttrs {
    pub size: Option<u64>,
    pub mode: Option<u32>,
}

/// Decodes a SETATTR value stream for the ids in `requested`. Returns the
/// ids it actually knows how to apply (the response mask) alongside the
/// parsed values. An id outside {size, mode, owner, owner_group} cannot be
/// skipped safely, since its width is unknown to this codec, and is
/// surfaced as `NFS4ERR_ATTRNOTSUPP`.
pub fn decode_writeattrs(dec: &mut Decoder, requested: &[u32]) -> Result<(WriteAttrs, Vec<u32>)> {
    let mut out = WriteAttrs::default();
    let mut applied = Vec::new();
    let mut sorted = requested.to_vec();
    sorted.sort_unstable();
    for id in sorted {
        match id {
            ATTR_SIZE => {
                out.size = Some(dec.u64()?);
                applied.push(id);
            }
            ATTR_MODE => {
                out.mode = Some(dec.u32()?);
                applied.push(id);
            }
            ATTR_OWNER => {
                let _ = dec.string(64)?;
            }
            ATTR_OWNER_GROUP => {
                let _ = dec.string(64)?;
            }
            other => {
                return Err(Error::Nfs4(crate::nfsv4::status::NFS4ERR_ATTRNOTSUPP, format!(
                    "attribute id {other} is not settable"
                )))
            }
        }
    }
    Ok((out, applied))
}

pub fn vfs_error_to_status(err: VfsError) -> u32 {
    use crate::nfsv4::status::*;
    match err {
        VfsError::NotFound => NFS4ERR_NOENT,
        VfsError::NotDir => NFS4ERR_NOTDIR,
        VfsError::IsDir => NFS4ERR_INVAL,
        VfsError::Exist => NFS4ERR_EXIST,
        VfsError::NotEmpty => NFS4ERR_EXIST,
        VfsError::InvalidArgument => NFS4ERR_INVAL,
        VfsError::Io => NFS4ERR_IO,
        VfsError::Access => NFS4ERR_ACCESS,
        VfsError::BadHandle => NFS4ERR_BADHANDLE,
        VfsError::NotSupported => NFS4ERR_NOTSUPP,
    }
}

/// Same mapping for the NFSv3 status namespace (`nfsv3::status`), which
/// shares most numeric values with NFSv4 but is a distinct enumeration on
/// the wire.
pub fn vfs_error_to_nfs3_status(err: VfsError) -> u32 {
    use crate::nfsv3::status::*;
    match err {
        VfsError::NotFound => NFS3ERR_NOENT,
        VfsError::NotDir => NFS3ERR_NOTDIR,
        VfsError::Access => NFS3ERR_ACCES,
        VfsError::IsDir | VfsError::InvalidArgument => NFS3ERR_INVAL,
        VfsError::Exist | VfsError::NotEmpty => NFS3ERR_EXIST,
        VfsError::Io => NFS3ERR_IO,
        VfsError::BadHandle => NFS3ERR_BADHANDLE,
        VfsError::NotSupported => NFS3ERR_NOTSUPP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{FileInfo, FileTime};

    fn sample_info() -> FileInfo {
        FileInfo {
            name: "root".into(),
            fileid: 1,
            is_directory: true,
            mode: 0o755,
            size: 0,
            num_links: 2,
            atime: FileTime::default(),
            mtime: FileTime::default(),
            ctime: FileTime::default(),
        }
    }

    #[test]
    fn bitmap_round_trip() {
        let mut enc = Encoder::new();
        encode_bitmap(&mut enc, &[0, 1, 33]);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        let ids = decode_bitmap(&mut dec).unwrap();
        assert_eq!(ids, vec![0, 1, 33]);
    }

    #[test]
    fn getattr_restricts_to_requested_and_supported() {
        let info = sample_info();
        let ctx = AttrContext { handle: &[0, 0, 0, 0, 0, 0, 0, 1], info: &info };
        let (ret, _values) = encode_attrs(&[ATTR_TYPE, ATTR_SIZE, 9999], &ctx);
        assert_eq!(ret, vec![ATTR_TYPE, ATTR_SIZE]);
    }

    #[test]
    fn setattr_decodes_size_then_mode_in_ascending_order() {
        let mut enc = Encoder::new();
        enc.u64(42);
        enc.u32(0o700);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        let (attrs, applied) = decode_writeattrs(&mut dec, &[ATTR_MODE, ATTR_SIZE]).unwrap();
        assert_eq!(attrs.size, Some(42));
        assert_eq!(attrs.mode, Some(0o700));
        assert_eq!(applied, vec![ATTR_SIZE, ATTR_MODE]);
    }

    #[test]
    fn setattr_rejects_unknown_writable_id() {
        let mut dec = Decoder::new(&[]);
        assert!(decode_writeattrs(&mut dec, &[ATTR_FILEID]).is_err());
    }
}
