//! Exercises the NFSv4 COMPOUND engine end-to-end against the in-memory
//! VFS: lookup/create/open/read/write/remove chains, COMPOUND linearity
//! (short-circuit on the first failing op), and handle stability across
//! CREATE/OPEN.

use nfsd4::attrs::{ATTR_MODE, ATTR_SIZE, ATTR_TYPE};
use nfsd4::nfsv4::{handle_compound, opcode};
use nfsd4::session::SessionState;
use nfsd4::vfs::memory::InMemoryVfs;
use nfsd4::vfs::Vfs;
use nfsd4::xdr::{Decoder, Encoder};

const NF4DIR: u32 = 2;

fn encode_bitmap(enc: &mut Encoder, ids: &[u32]) {
    let words_needed = ids.iter().map(|id| id / 32 + 1).max().unwrap_or(0) as usize;
    let mut words = vec![0u32; words_needed];
    for id in ids {
        words[(*id / 32) as usize] |= 1 << (id % 32);
    }
    enc.bitmap(&words);
}

fn encode_compound(ops: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.string("");
    enc.u32(0); // minorversion
    enc.u32(ops.len() as u32);
    for (opcode, args) in ops {
        enc.u32(*opcode);
        enc.raw(args);
    }
    enc.into_bytes()
}

fn op_args(write: impl FnOnce(&mut Encoder)) -> Vec<u8> {
    let mut enc = Encoder::new();
    write(&mut enc);
    enc.into_bytes()
}

/// Runs one COMPOUND request and returns its top-level status plus a
/// `Decoder` positioned right after `{status, tag}`, ready for the caller
/// to walk `numres` and each op's own `(opcode, status, resok)` fields —
/// which are type-dependent, so there's no generic way to slice them.
async fn run(ops: Vec<(u32, Vec<u8>)>, session: &mut SessionState, vfs: &dyn Vfs) -> (u32, Decoder<'static>) {
    let body = encode_compound(&ops);
    let mut dec = Decoder::new(&body);
    let reply_bytes = handle_compound(&mut dec, session, vfs).await.unwrap();
    // Leak the reply so a 'static Decoder can be returned to the caller
    // for further, result-specific field decoding.
    let leaked: &'static [u8] = Box::leak(reply_bytes.into_boxed_slice());
    let mut reply_dec = Decoder::new(leaked);
    let status = reply_dec.u32().unwrap();
    let _tag = reply_dec.string(128).unwrap();
    (status, reply_dec)
}

#[tokio::test]
async fn scenario_1_getattr_on_fresh_root() {
    let vfs = InMemoryVfs::new();
    let mut session = SessionState::new();

    let ops = vec![
        (opcode::PUTROOTFH, Vec::new()),
        (opcode::GETATTR, op_args(|e| encode_bitmap(e, &[ATTR_TYPE, ATTR_SIZE, ATTR_MODE]))),
    ];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);

    let _numres = dec.u32().unwrap();
    let _opcode = dec.u32().unwrap();
    let op_status = dec.u32().unwrap();
    assert_eq!(op_status, nfsd4::nfsv4::status::NFS4_OK);
    let _ret_ids = dec.bitmap(8).unwrap();
    let values = dec.opaque(4096).unwrap();
    let mut vdec = Decoder::new(&values);
    assert_eq!(vdec.u32().unwrap(), NF4DIR); // type
    assert_eq!(vdec.u64().unwrap(), 0); // size
    assert_eq!(vdec.u32().unwrap() & 0o7777, 0o755); // mode
}

#[tokio::test]
async fn scenario_2_lookup_then_getfh() {
    let vfs = InMemoryVfs::new();
    vfs.mkdir_all("/mount").await.unwrap();
    let mut session = SessionState::new();

    let ops = vec![
        (opcode::PUTROOTFH, Vec::new()),
        (opcode::LOOKUP, op_args(|e| e.string("mount"))),
        (opcode::GETFH, Vec::new()),
    ];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);

    let numres = dec.u32().unwrap();
    assert_eq!(numres, 3);
    for _ in 0..2 {
        let _opcode = dec.u32().unwrap();
        let op_status = dec.u32().unwrap();
        assert_eq!(op_status, nfsd4::nfsv4::status::NFS4_OK);
    }
    let _getfh_opcode = dec.u32().unwrap();
    let getfh_status = dec.u32().unwrap();
    assert_eq!(getfh_status, nfsd4::nfsv4::status::NFS4_OK);
    let fh = dec.opaque(64).unwrap();
    assert_eq!(vfs.resolve_handle(&fh).await.unwrap(), "/mount");
}

#[tokio::test]
async fn scenario_3_create_dir_then_getattr_mode() {
    let vfs = InMemoryVfs::new();
    let root_fh = vfs.root_handle().await;
    let mut session = SessionState::new();

    let ops = vec![
        (opcode::PUTFH, op_args(|e| e.opaque(&root_fh))),
        (
            opcode::CREATE,
            op_args(|e| {
                e.u32(NF4DIR);
                e.string("newdir");
                encode_bitmap(e, &[ATTR_MODE]);
                e.opaque(&{
                    let mut v = Encoder::new();
                    v.u32(0o700);
                    v.into_bytes()
                });
            }),
        ),
        (opcode::GETATTR, op_args(|e| encode_bitmap(e, &[ATTR_MODE]))),
    ];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);

    let numres = dec.u32().unwrap();
    assert_eq!(numres, 3);
    let _opcode = dec.u32().unwrap();
    assert_eq!(dec.u32().unwrap(), nfsd4::nfsv4::status::NFS4_OK); // PUTFH
    let _opcode = dec.u32().unwrap();
    assert_eq!(dec.u32().unwrap(), nfsd4::nfsv4::status::NFS4_OK); // CREATE
    let _cinfo_atomic = dec.bool().unwrap();
    let _before = dec.u64().unwrap();
    let _after = dec.u64().unwrap();
    let _attrset = dec.bitmap(8).unwrap();
    let _opcode = dec.u32().unwrap();
    assert_eq!(dec.u32().unwrap(), nfsd4::nfsv4::status::NFS4_OK); // GETATTR
    let _ret_ids = dec.bitmap(8).unwrap();
    let values = dec.opaque(4096).unwrap();
    let mut vdec = Decoder::new(&values);
    assert_eq!(vdec.u32().unwrap() & 0o7777, 0o700);

    let info = vfs.stat("/newdir").await.unwrap();
    assert!(info.is_directory);
    assert_eq!(info.mode & 0o7777, 0o700);
}

fn stateid_from_resok(dec: &mut Decoder) -> u64 {
    let _seqid = dec.u32().unwrap();
    let other = dec.fixed_opaque(12).unwrap();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&other[0..8]);
    u64::from_be_bytes(bytes)
}

fn encode_stateid(enc: &mut Encoder, seqid: u64) {
    enc.u32(0);
    let mut other = [0u8; 12];
    other[0..8].copy_from_slice(&seqid.to_be_bytes());
    enc.fixed_opaque(&other);
}

fn open_create_args(name: &str) -> Vec<u8> {
    op_args(|e| {
        e.u32(0); // seqid
        e.u32(3); // share_access: OPEN4_SHARE_ACCESS_BOTH
        e.u32(0); // share_deny: OPEN4_SHARE_DENY_NONE
        e.u64(0); // clientid
        e.opaque(b"owner"); // owner
        e.u32(1); // OPEN4_CREATE
        e.u32(0); // UNCHECKED4
        encode_bitmap(e, &[]); // createattrs bitmap: none
        e.opaque(&[]); // createattrs values
        e.u32(0); // CLAIM_NULL
        e.string(name);
    })
}

fn open_nocreate_args(name: &str) -> Vec<u8> {
    op_args(|e| {
        e.u32(0);
        e.u32(3);
        e.u32(0);
        e.u64(0);
        e.opaque(b"owner");
        e.u32(0); // OPEN4_NOCREATE
        e.u32(0); // CLAIM_NULL
        e.string(name);
    })
}

#[tokio::test]
async fn scenario_4_open_write_close_then_read() {
    let vfs = InMemoryVfs::new();
    let root_fh = vfs.root_handle().await;
    let mut session = SessionState::new();

    let ops = vec![
        (opcode::PUTFH, op_args(|e| e.opaque(&root_fh))),
        (opcode::OPEN, open_create_args("a.txt")),
    ];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);
    let _numres = dec.u32().unwrap();
    let _opcode = dec.u32().unwrap();
    dec.u32().unwrap(); // PUTFH status
    let _opcode = dec.u32().unwrap();
    dec.u32().unwrap(); // OPEN status
    let stateid = stateid_from_resok(&mut dec);

    let ops = vec![
        (
            opcode::WRITE,
            op_args(|e| {
                encode_stateid(e, stateid);
                e.u64(0); // offset
                e.u32(2); // FILE_SYNC4
                e.opaque(b"hello");
            }),
        ),
        (opcode::CLOSE, op_args(|e| {
            e.u32(0);
            encode_stateid(e, stateid);
        })),
    ];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);
    let _numres = dec.u32().unwrap();
    let _opcode = dec.u32().unwrap();
    dec.u32().unwrap(); // WRITE status
    let count = dec.u32().unwrap();
    assert_eq!(count, 5);

    let root_fh = vfs.root_handle().await;
    let ops = vec![
        (opcode::PUTFH, op_args(|e| e.opaque(&root_fh))),
        (opcode::OPEN, open_nocreate_args("a.txt")),
    ];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);
    let _numres = dec.u32().unwrap();
    let _opcode = dec.u32().unwrap();
    dec.u32().unwrap();
    let _opcode = dec.u32().unwrap();
    dec.u32().unwrap();
    let stateid = stateid_from_resok(&mut dec);

    let ops = vec![(
        opcode::READ,
        op_args(|e| {
            encode_stateid(e, stateid);
            e.u64(0);
            e.u32(1024);
        }),
    )];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);
    let _numres = dec.u32().unwrap();
    let _opcode = dec.u32().unwrap();
    dec.u32().unwrap();
    let eof = dec.bool().unwrap();
    let data = dec.opaque(1024).unwrap();
    assert!(eof);
    assert_eq!(data, b"hello");
}

#[tokio::test]
async fn scenario_5_lookup_missing_short_circuits() {
    let vfs = InMemoryVfs::new();
    let mut session = SessionState::new();

    let ops = vec![
        (opcode::PUTROOTFH, Vec::new()),
        (opcode::LOOKUP, op_args(|e| e.string("missing"))),
        // A third op that must never execute because LOOKUP fails first.
        (opcode::GETFH, Vec::new()),
    ];
    let (status, mut dec) = run(ops, &mut session, &vfs).await;
    assert_eq!(status, nfsd4::nfsv4::status::NFS4ERR_NOENT);
    let numres = dec.u32().unwrap();
    assert_eq!(numres, 2, "compound must stop after the failing LOOKUP");
}

#[tokio::test]
async fn scenario_6_concurrent_sessions_do_not_interfere() {
    let vfs = std::sync::Arc::new(InMemoryVfs::new());

    async fn write_file(vfs: std::sync::Arc<InMemoryVfs>, name: &'static str, content: &'static [u8]) {
        let mut session = SessionState::new();
        let root_fh = vfs.root_handle().await;
        let ops = vec![
            (opcode::PUTFH, op_args(|e| e.opaque(&root_fh))),
            (opcode::OPEN, open_create_args(name)),
        ];
        let (status, mut dec) = run(ops, &mut session, vfs.as_ref()).await;
        assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);
        dec.u32().unwrap();
        dec.u32().unwrap();
        dec.u32().unwrap();
        dec.u32().unwrap();
        dec.u32().unwrap();
        let stateid = stateid_from_resok(&mut dec);

        let ops = vec![(
            opcode::WRITE,
            op_args(|e| {
                encode_stateid(e, stateid);
                e.u64(0);
                e.u32(2);
                e.opaque(content);
            }),
        )];
        let (status, _dec) = run(ops, &mut session, vfs.as_ref()).await;
        assert_eq!(status, nfsd4::nfsv4::status::NFS4_OK);
    }

    let a = write_file(vfs.clone(), "b.txt", b"file-b");
    let b = write_file(vfs.clone(), "c.txt", b"file-c");
    tokio::join!(a, b);

    assert_eq!(vfs.stat("/b.txt").await.unwrap().size, 6);
    assert_eq!(vfs.stat("/c.txt").await.unwrap().size, 6);
}
