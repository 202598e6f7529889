//! Per-operation COMPOUND handlers. Each handler decodes its own arguments
//! from the shared request [`Decoder`], mutates [`SessionState`] and/or
//! calls through `vfs`, and returns `(status, resok_bytes)` — `resok_bytes`
//! is only meaningful when `status == NFS4_OK` (every op here follows the
//! common RFC 7530 convention that a failed op's `*4res` union carries no
//! further data).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::attrs::{self, vfs_error_to_status, AttrContext};
use crate::error::{Error, Result};
use crate::session::{ClientRegistration, SessionState, ShareAccess};
use crate::vfs::{handle_for_fileid, FileHandle, OpenFlags, Vfs};
use crate::xdr::{Decoder, Encoder};

use super::status::{self, NFS4_OK};

type OpResult = Result<(u32, Vec<u8>)>;

fn ok(resok: Vec<u8>) -> OpResult {
    Ok((NFS4_OK, resok))
}

fn fail(code: u32) -> OpResult {
    Ok((code, Vec::new()))
}

fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// LOOKUP component validation.
fn valid_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

fn encode_stateid(enc: &mut Encoder, seqid: u64) {
    enc.u32(0);
    let mut other = [0u8; 12];
    other[0..8].copy_from_slice(&seqid.to_be_bytes());
    enc.fixed_opaque(&other);
}

fn decode_stateid(dec: &mut Decoder) -> crate::error::Result<u64> {
    let _seqid = dec.u32()?;
    let other = dec.fixed_opaque(12)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&other[0..8]);
    Ok(u64::from_be_bytes(bytes))
}

async fn current_path(session: &SessionState, vfs: &dyn Vfs) -> std::result::Result<String, u32> {
    let fh = session.current_handle().ok_or(status::NFS4ERR_NOFILEHANDLE)?;
    vfs.resolve_handle(fh).await.map_err(|_| status::NFS4ERR_BADHANDLE)
}

fn attr_context<'a>(handle: &'a [u8], info: &'a crate::vfs::FileInfo) -> AttrContext<'a> {
    AttrContext { handle, info }
}

/// Dispatches one opcode against the shared session/vfs. An `Err` return
/// aborts the whole COMPOUND (malformed XDR); anything else is carried as
/// a per-op status in the COMPOUND result array.
pub async fn dispatch(
    opcode: u32,
    dec: &mut Decoder,
    session: &mut SessionState,
    vfs: &dyn Vfs,
) -> OpResult {
    use super::opcode::*;
    match opcode {
        PUTROOTFH => putrootfh(session, vfs).await,
        PUTFH => putfh(dec, session, vfs).await,
        GETFH => getfh(session),
        SAVEFH => savefh(session),
        RESTOREFH => restorefh(session),
        LOOKUP => lookup(dec, session, vfs).await,
        GETATTR => getattr(dec, session, vfs).await,
        SETATTR => setattr(dec, session, vfs).await,
        ACCESS => access(dec, session, vfs).await,
        READDIR => readdir(dec, session, vfs).await,
        SECINFO => secinfo(dec, session, vfs).await,
        OPEN => open(dec, session, vfs).await,
        CLOSE => close(dec, session).await,
        READ => read(dec, session).await,
        WRITE => write(dec, session).await,
        CREATE => create(dec, session, vfs).await,
        REMOVE => remove(dec, session, vfs).await,
        RENEW => renew(dec, session),
        SETCLIENTID => setclientid(dec, session),
        SETCLIENTID_CONFIRM => setclientid_confirm(dec, session),
        EXCHANGE_ID => exchange_id(dec),
        _ => fail(status::NFS4ERR_OP_ILLEGAL),
    }
}

async fn putrootfh(session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    session.set_cwd(vfs.root_handle().await);
    ok(Vec::new())
}

async fn putfh(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let fh: FileHandle = dec.opaque(64)?;
    if vfs.resolve_handle(&fh).await.is_err() {
        return fail(status::NFS4ERR_BADHANDLE);
    }
    session.set_cwd(fh);
    ok(Vec::new())
}

fn getfh(session: &mut SessionState) -> OpResult {
    match session.current_handle() {
        Some(fh) => {
            let mut enc = Encoder::new();
            enc.opaque(fh);
            ok(enc.into_bytes())
        }
        None => fail(status::NFS4ERR_NOFILEHANDLE),
    }
}

fn savefh(session: &mut SessionState) -> OpResult {
    match session.push_handle() {
        Some(()) => ok(Vec::new()),
        None => fail(status::NFS4ERR_NOFILEHANDLE),
    }
}

fn restorefh(session: &mut SessionState) -> OpResult {
    match session.pop_handle() {
        Some(()) => ok(Vec::new()),
        None => fail(status::NFS4ERR_INVAL),
    }
}

async fn lookup(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let name = dec.string(255)?;
    if !valid_component(&name) {
        return fail(status::NFS4ERR_INVAL);
    }
    let dir = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let dir_info = match vfs.stat(&dir).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    if !dir_info.is_directory {
        return fail(status::NFS4ERR_NOTDIR);
    }
    let path = join_path(&dir, &name);
    match vfs.stat(&path).await {
        Ok(info) => {
            session.set_cwd(handle_for_fileid(info.fileid));
            ok(Vec::new())
        }
        Err(_) => fail(status::NFS4ERR_NOENT),
    }
}

async fn getattr(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let requested = attrs::decode_bitmap(dec)?;
    let path = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let info = match vfs.stat(&path).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    let handle = session.current_handle().cloned().unwrap_or_default();
    let ctx = attr_context(&handle, &info);
    let (ret_ids, values) = attrs::encode_attrs(&requested, &ctx);
    let mut enc = Encoder::new();
    attrs::encode_bitmap(&mut enc, &ret_ids);
    enc.opaque(&values);
    ok(enc.into_bytes())
}

async fn setattr(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let _stateid = decode_stateid(dec)?;
    let requested = attrs::decode_bitmap(dec)?;
    let value_bytes = dec.opaque(attrs::SUPPORTED_IDS.len() as u32 * 32)?;
    let mut value_dec = Decoder::new(&value_bytes);
    let (write_attrs, applied) = match attrs::decode_writeattrs(&mut value_dec, &requested) {
        Ok(pair) => pair,
        Err(Error::Nfs4(code, _)) => return fail(code),
        Err(other) => return Err(other),
    };

    let path = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };

    if let Some(size) = write_attrs.size {
        let flags = OpenFlags { read: false, write: true, create: false, truncate: false };
        match vfs.open(&path, flags).await {
            Ok(file) => {
                if let Err(e) = file.truncate(size).await {
                    return fail(vfs_error_to_status(e));
                }
                let _ = file.close().await;
            }
            Err(e) => return fail(vfs_error_to_status(e)),
        }
    }
    if let Some(mode) = write_attrs.mode {
        if let Err(e) = vfs.chmod(&path, mode).await {
            return fail(vfs_error_to_status(e));
        }
    }

    let mut enc = Encoder::new();
    attrs::encode_bitmap(&mut enc, &applied);
    ok(enc.into_bytes())
}

const ACCESS_READ: u32 = 0x0001;
const ACCESS_LOOKUP: u32 = 0x0002;
const ACCESS_MODIFY: u32 = 0x0004;
const ACCESS_EXTEND: u32 = 0x0008;
const ACCESS_DELETE: u32 = 0x0010;
const ACCESS_EXECUTE: u32 = 0x0020;

async fn access(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let requested = dec.u32()?;
    let path = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let info = match vfs.stat(&path).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    let applicable = if info.is_directory {
        ACCESS_READ | ACCESS_LOOKUP | ACCESS_MODIFY | ACCESS_EXTEND | ACCESS_DELETE | ACCESS_EXECUTE
    } else {
        ACCESS_READ | ACCESS_MODIFY | ACCESS_EXTEND | ACCESS_DELETE | ACCESS_EXECUTE
    };
    let supported = requested & applicable;
    let mode = info.mode;
    let mut granted = 0u32;
    if supported & ACCESS_READ != 0 && mode & 0o444 != 0 {
        granted |= ACCESS_READ;
    }
    if supported & ACCESS_LOOKUP != 0 && mode & 0o111 != 0 {
        granted |= ACCESS_LOOKUP;
    }
    if supported & ACCESS_MODIFY != 0 && mode & 0o222 != 0 {
        granted |= ACCESS_MODIFY;
    }
    if supported & ACCESS_EXTEND != 0 && mode & 0o222 != 0 {
        granted |= ACCESS_EXTEND;
    }
    if supported & ACCESS_DELETE != 0 && mode & 0o222 != 0 {
        granted |= ACCESS_DELETE;
    }
    if supported & ACCESS_EXECUTE != 0 && mode & 0o111 != 0 {
        granted |= ACCESS_EXECUTE;
    }
    let mut enc = Encoder::new();
    enc.u32(supported);
    enc.u32(granted);
    ok(enc.into_bytes())
}

async fn readdir(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let cookie = dec.u64()?;
    let _verifier = dec.fixed_opaque(8)?;
    let _dircount = dec.u32()?;
    let maxcount = dec.u32()?;
    let requested = attrs::decode_bitmap(dec)?;

    let path = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let dir_info = match vfs.stat(&path).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    if !dir_info.is_directory {
        return fail(status::NFS4ERR_NOTDIR);
    }
    let entries = match vfs.read_dir(&path).await {
        Ok(e) => e,
        Err(e) => return fail(vfs_error_to_status(e)),
    };

    let mut enc = Encoder::new();
    enc.fixed_opaque(&[0u8; 8]); // cookie verifier: generation tracking is not implemented
    let start = cookie as usize;
    let mut eof = true;
    let mut body_len = 0usize;
    for (idx, info) in entries.iter().enumerate() {
        if idx < start {
            continue;
        }
        let handle = handle_for_fileid(info.fileid);
        let ctx = attr_context(&handle, info);
        let (ret_ids, values) = attrs::encode_attrs(&requested, &ctx);

        let mut entry_enc = Encoder::new();
        entry_enc.u64((idx + 1) as u64);
        entry_enc.string(&info.name);
        attrs::encode_bitmap(&mut entry_enc, &ret_ids);
        entry_enc.opaque(&values);
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
    ok(enc.into_bytes())
}

async fn secinfo(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let name = dec.string(255)?;
    if !valid_component(&name) {
        return fail(status::NFS4ERR_INVAL);
    }
    let dir = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let dir_info = match vfs.stat(&dir).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    if !dir_info.is_directory {
        return fail(status::NFS4ERR_NOTDIR);
    }
    const AUTH_NONE: u32 = 0;
    let mut enc = Encoder::new();
    enc.vector(&[AUTH_NONE], |e, v| e.u32(*v));
    ok(enc.into_bytes())
}

const OPEN4_NOCREATE: u32 = 0;
const OPEN4_CREATE: u32 = 1;
const UNCHECKED4: u32 = 0;
const GUARDED4: u32 = 1;
const EXCLUSIVE4: u32 = 2;
const CLAIM_NULL: u32 = 0;

async fn open(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let _seqid = dec.u32()?;
    let share_access = dec.u32()?;
    let _share_deny = dec.u32()?;
    let _clientid = dec.u64()?;
    let _owner = dec.opaque(1024)?;

    let opentype = dec.u32()?;
    let mut mode: Option<u32> = None;
    let mut want_truncate = false;
    let mut guarded = false;
    if opentype == OPEN4_CREATE {
        let how = dec.u32()?;
        match how {
            UNCHECKED4 | GUARDED4 => {
                let requested = attrs::decode_bitmap(dec)?;
                let value_bytes = dec.opaque(4096)?;
                let mut value_dec = Decoder::new(&value_bytes);
                let (write_attrs, _applied) = match attrs::decode_writeattrs(&mut value_dec, &requested) {
                    Ok(pair) => pair,
                    Err(Error::Nfs4(code, _)) => return fail(code),
                    Err(other) => return Err(other),
                };
                mode = write_attrs.mode;
                want_truncate = matches!(write_attrs.size, Some(0));
                guarded = how == GUARDED4;
            }
            EXCLUSIVE4 => {
                let _verifier = dec.fixed_opaque(8)?;
                // EXCLUSIVE4 degrades to GUARDED4-equivalent behavior; the
                // verifier is accepted but not persisted for later replay
                // detection.
                guarded = true;
            }
            _other => return fail(status::NFS4ERR_NOTSUPP),
        }
    }

    let claim = dec.u32()?;
    if claim != CLAIM_NULL {
        return fail(status::NFS4ERR_NOTSUPP);
    }
    let name = dec.string(255)?;
    if !valid_component(&name) {
        return fail(status::NFS4ERR_INVAL);
    }

    let dir = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let dir_info = match vfs.stat(&dir).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    if !dir_info.is_directory {
        return fail(status::NFS4ERR_NOTDIR);
    }
    let path = join_path(&dir, &name);
    let exists = vfs.stat(&path).await.is_ok();
    if guarded && exists && opentype == OPEN4_CREATE {
        return fail(status::NFS4ERR_EXIST);
    }

    let flags = OpenFlags {
        read: share_access & 0x1 != 0 || share_access == 0,
        write: share_access & 0x2 != 0,
        create: opentype == OPEN4_CREATE,
        truncate: want_truncate,
    };
    let file = match vfs.open_file(&path, flags, mode.unwrap_or(0o644)).await {
        Ok(f) => f,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    let info = match vfs.stat(&path).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    session.set_cwd(handle_for_fileid(info.fileid));
    let seqid = session.add_opened_file(
        path,
        file,
        ShareAccess { read: flags.read, write: flags.write },
    );

    let mut enc = Encoder::new();
    encode_stateid(&mut enc, seqid);
    enc.bool(true); // change_info4.atomic
    enc.u64(0);
    enc.u64(info.fileid);
    enc.u32(0); // rflags
    attrs::encode_bitmap(&mut enc, if mode.is_some() { &[attrs::ATTR_MODE] } else { &[] });
    enc.u32(0); // delegation: OPEN_DELEGATE_NONE
    ok(enc.into_bytes())
}

async fn close(dec: &mut Decoder, session: &mut SessionState) -> OpResult {
    let _seqid = dec.u32()?;
    let stateid = decode_stateid(dec)?;
    match session.remove_opened_file(stateid) {
        Some(state) => {
            let _ = state.file.close().await;
            let mut enc = Encoder::new();
            encode_stateid(&mut enc, stateid);
            ok(enc.into_bytes())
        }
        None => fail(status::NFS4ERR_BAD_STATEID),
    }
}

async fn read(dec: &mut Decoder, session: &mut SessionState) -> OpResult {
    let stateid = decode_stateid(dec)?;
    let offset = dec.u64()?;
    let count = dec.u32()?;
    let state = match session.get_opened_file(stateid) {
        Some(s) => s,
        None => return fail(status::NFS4ERR_BAD_STATEID),
    };
    match state.file.read(offset, count).await {
        Ok((data, eof)) => {
            let mut enc = Encoder::new();
            enc.bool(eof);
            enc.opaque(&data);
            ok(enc.into_bytes())
        }
        Err(e) => fail(vfs_error_to_status(e)),
    }
}

const FILE_SYNC4: u32 = 2;

async fn write(dec: &mut Decoder, session: &mut SessionState) -> OpResult {
    let stateid = decode_stateid(dec)?;
    let offset = dec.u64()?;
    let _stable = dec.u32()?;
    let data = dec.opaque(crate::xdr::MAX_VEC_LEN)?;
    let state = match session.get_opened_file(stateid) {
        Some(s) => s,
        None => return fail(status::NFS4ERR_BAD_STATEID),
    };
    match state.file.write(offset, &data).await {
        Ok(count) => {
            let mut enc = Encoder::new();
            enc.u32(count);
            enc.u32(FILE_SYNC4); // this engine treats every write as FILE_SYNC4
            enc.fixed_opaque(&[0u8; 8]);
            ok(enc.into_bytes())
        }
        Err(e) => fail(vfs_error_to_status(e)),
    }
}

const NF4REG: u32 = 1;
const NF4DIR: u32 = 2;

async fn create(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let object_type = dec.u32()?;
    if object_type != NF4REG && object_type != NF4DIR {
        return fail(status::NFS4ERR_NOTSUPP);
    }
    let name = dec.string(255)?;
    if !valid_component(&name) {
        return fail(status::NFS4ERR_INVAL);
    }
    let requested = attrs::decode_bitmap(dec)?;
    let value_bytes = dec.opaque(4096)?;
    let mut value_dec = Decoder::new(&value_bytes);
    let (write_attrs, applied) = match attrs::decode_writeattrs(&mut value_dec, &requested) {
        Ok(pair) => pair,
        Err(Error::Nfs4(code, _)) => return fail(code),
        Err(other) => return Err(other),
    };

    let dir = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let dir_info = match vfs.stat(&dir).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    if !dir_info.is_directory {
        return fail(status::NFS4ERR_NOTDIR);
    }
    let path = join_path(&dir, &name);
    if vfs.stat(&path).await.is_ok() {
        return fail(status::NFS4ERR_EXIST);
    }

    let mode = write_attrs.mode.unwrap_or(if object_type == NF4DIR { 0o755 } else { 0o644 });
    let result = if object_type == NF4DIR {
        match vfs.mkdir_all(&path).await {
            Ok(()) => vfs.chmod(&path, mode).await,
            Err(e) => Err(e),
        }
    } else {
        match vfs.open_file(&path, OpenFlags { read: false, write: false, create: true, truncate: false }, mode).await {
            Ok(file) => {
                let _ = file.close().await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    };
    if let Err(e) = result {
        return fail(vfs_error_to_status(e));
    }

    let info = match vfs.stat(&path).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    session.set_cwd(handle_for_fileid(info.fileid));

    let mut enc = Encoder::new();
    enc.bool(true);
    enc.u64(0);
    enc.u64(info.fileid);
    attrs::encode_bitmap(&mut enc, &applied);
    ok(enc.into_bytes())
}

async fn remove(dec: &mut Decoder, session: &mut SessionState, vfs: &dyn Vfs) -> OpResult {
    let name = dec.string(255)?;
    if !valid_component(&name) {
        return fail(status::NFS4ERR_INVAL);
    }
    let dir = match current_path(session, vfs).await {
        Ok(p) => p,
        Err(code) => return fail(code),
    };
    let dir_info = match vfs.stat(&dir).await {
        Ok(info) => info,
        Err(e) => return fail(vfs_error_to_status(e)),
    };
    if !dir_info.is_directory {
        return fail(status::NFS4ERR_NOTDIR);
    }
    let path = join_path(&dir, &name);
    match vfs.remove(&path).await {
        Ok(()) => {
            let mut enc = Encoder::new();
            enc.bool(true);
            enc.u64(0);
            enc.u64(1);
            ok(enc.into_bytes())
        }
        Err(e) => fail(vfs_error_to_status(e)),
    }
}

fn renew(dec: &mut Decoder, _session: &mut SessionState) -> OpResult {
    let _clientid = dec.u64()?;
    ok(Vec::new())
}

static NEXT_CLIENTID: AtomicU64 = AtomicU64::new(1);

fn setclientid(dec: &mut Decoder, session: &mut SessionState) -> OpResult {
    let verifier_bytes = dec.fixed_opaque(8)?;
    let id_string = dec.string(1024)?;
    let _cb_program = dec.u32()?;
    let _cb_netid = dec.string(64)?;
    let _cb_addr = dec.string(64)?;
    let _callback_ident = dec.u32()?;

    let mut verifier = [0u8; 8];
    verifier.copy_from_slice(&verifier_bytes);
    let clientid = NEXT_CLIENTID.fetch_add(1, Ordering::Relaxed);
    session.set_client(ClientRegistration { verifier, id_string, clientid, confirmed: false });

    let mut enc = Encoder::new();
    enc.u64(clientid);
    enc.fixed_opaque(&verifier);
    ok(enc.into_bytes())
}

fn setclientid_confirm(dec: &mut Decoder, session: &mut SessionState) -> OpResult {
    let clientid = dec.u64()?;
    let _verifier = dec.fixed_opaque(8)?;
    match session.client_id() {
        Some(c) if c.clientid == clientid => {
            session.confirm_client();
            ok(Vec::new())
        }
        _ => fail(status::NFS4ERR_INVAL),
    }
}

fn exchange_id(dec: &mut Decoder) -> OpResult {
    let _verifier = dec.fixed_opaque(8)?;
    let _owner_id = dec.opaque(1024)?;
    let _flags = dec.u32()?;
    let state_protect_how = dec.u32()?;
    if state_protect_how != 0 {
        return fail(status::NFS4ERR_NOTSUPP);
    }
    let _impl_id = dec.option(|d| {
        d.string(256)?;
        d.string(256)?;
        d.i64()?;
        d.u32()
    })?;

    // Accepted only for minor-version probing: always reports clientid 0,
    // not a real v4.1 session negotiation.
    let mut enc = Encoder::new();
    enc.u64(0); // eir_clientid
    enc.u32(1); // eir_sequenceid
    enc.u32(0); // eir_flags
    enc.u32(0); // eir_state_protect: SP4_NONE
    enc.u64(0); // eir_server_owner.minor_id
    enc.opaque(&[]); // eir_server_owner.major_id
    enc.opaque(&[]); // eir_server_scope
    enc.option(&None::<()>, |_, _| {}); // eir_server_impl_id
    ok(enc.into_bytes())
}
