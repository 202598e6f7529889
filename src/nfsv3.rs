//! NFSv3 procedure handlers: a small stateless subset kept around for
//! clients that probe version 3 before falling back to NFSv4.0.

use crate::attrs::vfs_error_to_nfs3_status;
use crate::error::Result;
use crate::vfs::{FileInfo, Vfs};
use crate::xdr::{Decoder, Encoder};

pub const PROGRAM: u32 = 100003;
pub const VERSION: u32 = 3;

pub mod proc_ {
    pub const NULL: u32 = 0;
    pub const GETATTR: u32 = 1;
    pub const LOOKUP: u32 = 3;
    pub const ACCESS: u32 = 4;
    pub const READDIRPLUS: u32 = 17;
    pub const FSSTAT: u32 = 18;
    pub const FSINFO: u32 = 19;
    pub const PATHCONF: u32 = 20;
}

pub mod status {
    pub const NFS3_OK: u32 = 0;
    pub const NFS3ERR_NOENT: u32 = 2;
    pub const NFS3ERR_IO: u32 = 5;
    pub const NFS3ERR_ACCES: u32 = 13;
    pub const NFS3ERR_EXIST: u32 = 17;
    pub const NFS3ERR_NOTDIR: u32 = 20;
    pub const NFS3ERR_INVAL: u32 = 22;
    pub const NFS3ERR_BADHANDLE: u32 = 10001;
    pub const NFS3ERR_NOTSUPP: u32 = 10004;
}

const NF3REG: u32 = 1;
const NF3DIR: u32 = 2;

/// Static limits advertised by FSINFO/FSSTAT/PATHCONF: this engine has no
/// real quota or performance model, so every client sees the same numbers
/// regardless of the underlying VFS.
const RTMAX: u32 = 4 * 1024 * 1024;
const WTMAX: u32 = 64 * 1024 * 1024;
const NAMEMAX: u32 = 255;

fn encode_fattr3(enc: &mut Encoder, info: &FileInfo) {
    enc.u32(if info.is_directory { NF3DIR } else { NF3REG });
    enc.u32(info.mode & 0o7777);
    enc.u32(info.num_links);
    enc.u32(0); // uid
    enc.u32(0); // gid
    enc.u64(info.size);
    enc.u64(info.size); // used
    enc.u32(0); // rdev.specdata1
    enc.u32(0); // rdev.specdata2
    enc.u64(1); // fsid
    enc.u64(info.fileid);
    encode_nfstime3(enc, info.atime);
    encode_nfstime3(enc, info.mtime);
    encode_nfstime3(enc, info.ctime);
}

fn encode_nfstime3(enc: &mut Encoder, t: crate::vfs::FileTime) {
    enc.u32(t.seconds as u32);
    enc.u32(t.nanos);
}

/// Dispatches one v3 procedure call, returning the encoded reply body
/// (status plus procedure-specific payload) that follows the RPC accept
/// preamble, or `None` if `proc_num` names no procedure this server
/// implements — the caller answers that case with an RPC-level
/// `PROC_UNAVAIL` accept status rather than any NFS-level status, since
/// there is no procedure-specific reply body to carry one in.
pub async fn dispatch(proc_num: u32, dec: &mut Decoder, vfs: &dyn Vfs) -> Result<Option<Vec<u8>>> {
    let mut enc = Encoder::new();
    match proc_num {
        proc_::NULL => {}
        proc_::GETATTR => getattr(dec, vfs, &mut enc).await?,
        proc_::ACCESS => access(dec, vfs, &mut enc).await?,
        proc_::LOOKUP => lookup(dec, vfs, &mut enc).await?,
        proc_::READDIRPLUS => readdirplus(dec, vfs, &mut enc).await?,
        proc_::FSINFO => fsinfo(dec, vfs, &mut enc).await?,
        proc_::FSSTAT => fsstat(dec, vfs, &mut enc).await?,
        proc_::PATHCONF => pathconf(dec, vfs, &mut enc).await?,
        _ => return Ok(None),
    }
    Ok(Some(enc.into_bytes()))
}

async fn resolve(dec: &mut Decoder, vfs: &dyn Vfs) -> Result<std::result::Result<String, u32>> {
    let fh = dec.opaque(64)?;
    match vfs.resolve_handle(&fh).await {
        Ok(path) => Ok(Ok(path)),
        Err(_) => Ok(Err(status::NFS3ERR_NOENT)),
    }
}

async fn getattr(dec: &mut Decoder, vfs: &dyn Vfs, enc: &mut Encoder) -> Result<()> {
    let path = match resolve(dec, vfs).await? {
        Ok(p) => p,
        Err(code) => {
            enc.u32(code);
            return Ok(());
        }
    };
    match vfs.stat(&path).await {
        Ok(info) => {
            enc.u32(status::NFS3_OK);
            encode_fattr3(enc, &info);
        }
        Err(e) => enc.u32(vfs_error_to_nfs3_status(e)),
    }
    Ok(())
}

async fn access(dec: &mut Decoder, vfs: &dyn Vfs, enc: &mut Encoder) -> Result<()> {
    let path = match resolve(dec, vfs).await? {
        Ok(p) => p,
        Err(code) => {
            enc.u32(code);
            return Ok(());
        }
    };
    let requested = dec.u32()?;
    match vfs.stat(&path).await {
        Ok(info) => {
            enc.u32(status::NFS3_OK);
            encode_fattr3(enc, &info);
            // Same applicable/granted computation as ACCESS in the v4
            // engine; the bits share the same numeric meaning between v3
            // and v4.
            let mode = info.mode;
            const READ: u32 = 0x1;
            const LOOKUP: u32 = 0x2;
            const MODIFY: u32 = 0x4;
            const EXTEND: u32 = 0x8;
            const DELETE: u32 = 0x10;
            const EXECUTE: u32 = 0x20;
            let applicable = if info.is_directory {
                READ | LOOKUP | MODIFY | EXTEND | DELETE | EXECUTE
            } else {
                READ | MODIFY | EXTEND | DELETE | EXECUTE
            };
            let supported = requested & applicable;
            let mut granted = 0u32;
            if supported & READ != 0 && mode & 0o444 != 0 {
                granted |= READ;
            }
            if supported & LOOKUP != 0 && mode & 0o111 != 0 {
                granted |= LOOKUP;
            }
            if supported & (MODIFY | EXTEND | DELETE) != 0 && mode & 0o222 != 0 {
                granted |= supported & (MODIFY | EXTEND | DELETE);
            }
            if supported & EXECUTE != 0 && mode & 0o111 != 0 {
                granted |= EXECUTE;
            }
            enc.u32(granted);
        }
        Err(e) => enc.u32(vfs_error_to_nfs3_status(e)),
    }
    Ok(())
}

async fn lookup(dec: &mut Decoder, vfs: &dyn Vfs, enc: &mut Encoder) -> Result<()> {
    let dir = match resolve(dec, vfs).await? {
        Ok(p) => p,
        Err(code) => {
            enc.u32(code);
            return Ok(());
        }
    };
    let name = dec.string(255)?;
    let dir_info = match vfs.stat(&dir).await {
        Ok(info) => info,
        Err(e) => {
            enc.u32(vfs_error_to_nfs3_status(e));
            return Ok(());
        }
    };
    if !dir_info.is_directory {
        enc.u32(status::NFS3ERR_NOTDIR);
        return Ok(());
    }
    let path = if dir == "/" { format!("/{name}") } else { format!("{dir}/{name}") };
    match vfs.stat(&path).await {
        Ok(info) => {
            enc.u32(status::NFS3_OK);
            enc.opaque(&crate::vfs::handle_for_fileid(info.fileid));
            enc.bool(true);
            encode_fattr3(enc, &info);
            enc.bool(true);
            encode_fattr3(enc, &dir_info);
        }
        Err(_) => enc.u32(status::NFS3ERR_NOENT),
    }
    Ok(())
}

async fn readdirplus(dec: &mut Decoder, vfs: &dyn Vfs, enc: &mut Encoder) -> Result<()> {
    let path = match resolve(dec, vfs).await? {
        Ok(p) => p,
        Err(code) => {
            enc.u32(code);
            return Ok(());
        }
    };
    let _cookie = dec.u64()?;
    let _cookieverf = dec.fixed_opaque(8)?;
    let _dircount = dec.u32()?;
    let maxcount = dec.u32()?;

    let dir_info = match vfs.stat(&path).await {
        Ok(info) => info,
        Err(e) => {
            enc.u32(vfs_error_to_nfs3_status(e));
            return Ok(());
        }
    };
    let entries = match vfs.read_dir(&path).await {
        Ok(e) => e,
        Err(e) => {
            enc.u32(vfs_error_to_nfs3_status(e));
            return Ok(());
        }
    };

    enc.u32(status::NFS3_OK);
    enc.bool(true);
    encode_fattr3(enc, &dir_info);
    enc.fixed_opaque(&[0u8; 8]);

    let mut body_len = 0usize;
    let mut eof = true;
    for (idx, info) in entries.iter().enumerate() {
        let mut entry_enc = Encoder::new();
        entry_enc.u64(info.fileid);
        entry_enc.string(&info.name);
        entry_enc.u64((idx + 1) as u64);
        entry_enc.bool(true);
        encode_fattr3(&mut entry_enc, info);
        entry_enc.bool(true);
        entry_enc.opaque(&crate::vfs::handle_for_fileid(info.fileid));
        let entry_bytes = entry_enc.into_bytes();

        if body_len + entry_bytes.len() > maxcount as usize && body_len > 0 {
            eof = false;
            break;
        }
        enc.bool(true);
        enc.raw(&entry_bytes);
        body_len += entry_bytes.len();
    }
    enc.bool(false);
    enc.bool(eof);
    Ok(())
}

async fn fsinfo(dec: &mut Decoder, vfs: &dyn Vfs, enc: &mut Encoder) -> Result<()> {
    let path = match resolve(dec, vfs).await? {
        Ok(p) => p,
        Err(code) => {
            enc.u32(code);
            return Ok(());
        }
    };
    match vfs.stat(&path).await {
        Ok(info) => {
            enc.u32(status::NFS3_OK);
            enc.bool(true);
            encode_fattr3(enc, &info);
            enc.u32(RTMAX);
            enc.u32(RTMAX);
            enc.u32(8 * 1024);
            enc.u32(WTMAX);
            enc.u32(WTMAX);
            enc.u32(8 * 1024);
            enc.u32(8 * 1024); // dtpref
            enc.u64(u64::MAX); // maxfilesize
            enc.u32(1); // time_delta.seconds
            enc.u32(0); // time_delta.nseconds
            enc.u32(0x1F); // properties: LINK|SYMLINK|HOMOGENEOUS|CANSETTIME
        }
        Err(e) => enc.u32(vfs_error_to_nfs3_status(e)),
    }
    Ok(())
}

async fn fsstat(dec: &mut Decoder, vfs: &dyn Vfs, enc: &mut Encoder) -> Result<()> {
    let path = match resolve(dec, vfs).await? {
        Ok(p) => p,
        Err(code) => {
            enc.u32(code);
            return Ok(());
        }
    };
    match vfs.stat(&path).await {
        Ok(info) => {
            enc.u32(status::NFS3_OK);
            enc.bool(true);
            encode_fattr3(enc, &info);
            // No real capacity accounting: report a generous fixed size.
            let total: u64 = 1024 * 1024 * 1024 * 1024;
            enc.u64(total);
            enc.u64(total);
            enc.u64(total);
            enc.u64(u32::MAX as u64);
            enc.u64(u32::MAX as u64);
            enc.u64(u32::MAX as u64);
            enc.u32(0); // invarsec
        }
        Err(e) => enc.u32(vfs_error_to_nfs3_status(e)),
    }
    Ok(())
}

async fn pathconf(dec: &mut Decoder, vfs: &dyn Vfs, enc: &mut Encoder) -> Result<()> {
    let path = match resolve(dec, vfs).await? {
        Ok(p) => p,
        Err(code) => {
            enc.u32(code);
            return Ok(());
        }
    };
    match vfs.stat(&path).await {
        Ok(info) => {
            enc.u32(status::NFS3_OK);
            enc.bool(true);
            encode_fattr3(enc, &info);
            enc.u32(8); // linkmax
            enc.u32(NAMEMAX);
            enc.bool(true); // no_trunc
            enc.bool(false); // chown_restricted
            enc.bool(true); // case_insensitive
            enc.bool(true); // case_preserving
        }
        Err(e) => enc.u32(vfs_error_to_nfs3_status(e)),
    }
    Ok(())
}
