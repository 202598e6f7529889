//! The VFS contract: a path-based filesystem abstraction the protocol
//! engine drives but never implements, built around paths and an explicit
//! handle<->path mapping, since the NFSv4 compound engine needs
//! `resolve_handle` as a first-class operation (PUTFH/GETFH round-trip
//! every filehandle it is handed).
//!
//! A concrete backend lives in [`memory`]; host-OS-backed storage is out of
//! scope.

pub mod memory;

use async_trait::async_trait;

/// Errors the VFS may return, trimmed to the subset the NFSv4 engine
/// actually maps to a status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VfsError {
    NotFound,
    NotDir,
    IsDir,
    Exist,
    NotEmpty,
    InvalidArgument,
    Io,
    Access,
    BadHandle,
    NotSupported,
}

pub type VfsResult<T> = std::result::Result<T, VfsError>;

/// Opaque filehandle. The wire encoding is a fixed-width 8-byte big-endian
/// file-id; the protocol engine never inspects the bytes.
pub type FileHandle = Vec<u8>;

pub fn handle_for_fileid(fileid: u64) -> FileHandle {
    fileid.to_be_bytes().to_vec()
}

pub fn fileid_for_handle(handle: &FileHandle) -> VfsResult<u64> {
    let bytes: [u8; 8] = handle.as_slice().try_into().map_err(|_| VfsError::BadHandle)?;
    Ok(u64::from_be_bytes(bytes))
}

/// A point in time as carried by NFSv4 `nfstime4` (seconds + nanoseconds).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FileTime {
    pub seconds: i64,
    pub nanos: u32,
}

/// Attributes and identity of one filesystem object, as returned by `Stat`
/// and by directory listing. Fields are exactly what the attribute codec
/// (`attrs.rs`) needs to answer every supported attribute id.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub fileid: u64,
    pub is_directory: bool,
    pub mode: u32,
    pub size: u64,
    pub num_links: u32,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub ctime: FileTime,
}

/// Attribute changes accepted by `Chmod`/`SetAttr`-style calls. The VFS
/// contract only names `Chmod` explicitly; `size` changes go through the
/// open file's `truncate`, so this only carries `mode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
}

/// An open file object: read/write/seek/truncate/sync/close. Seeking is
/// modeled as an explicit offset on each call rather than mutable cursor
/// state, since every NFSv4 READ/WRITE carries its own offset.
#[async_trait]
pub trait VfsFile: Send + Sync {
    async fn read(&self, offset: u64, count: u32) -> VfsResult<(Vec<u8>, bool)>;
    async fn write(&self, offset: u64, data: &[u8]) -> VfsResult<u32>;
    async fn truncate(&self, size: u64) -> VfsResult<()>;
    async fn sync(&self) -> VfsResult<()>;
    async fn close(&self) -> VfsResult<()>;
}

/// Flags passed to `OpenFile`, mirroring the share-access bits OPEN
/// carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

/// The abstract filesystem the protocol engine is built against.
/// Implementations own filehandle encoding only insofar as they hand back
/// `FileInfo::fileid`; this crate's own handle encoding
/// (`handle_for_fileid`/`fileid_for_handle`) is shared by every backend
/// since the wire format is fixed.
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Handle of the filesystem root.
    async fn root_handle(&self) -> FileHandle;

    /// `Stat`: attributes of the object at `path`.
    async fn stat(&self, path: &str) -> VfsResult<FileInfo>;

    /// Resolves an opaque handle back to the path it was issued for.
    /// Round-trip contract: `resolve_handle(handle_for(stat(path)))  == path`
    /// for as long as the object exists and has not been renamed.
    async fn resolve_handle(&self, handle: &FileHandle) -> VfsResult<String>;

    /// `Open`: opens an existing regular file for read/write.
    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn VfsFile>>;

    /// `OpenFile(path, flags, mode)`: opens, creating the file first if
    /// `flags.create` is set and it does not exist.
    async fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn VfsFile>>;

    /// `Chmod`.
    async fn chmod(&self, path: &str, mode: u32) -> VfsResult<()>;

    /// `Rename`.
    async fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// `Remove`: unlinks a file, or an empty directory.
    async fn remove(&self, path: &str) -> VfsResult<()>;

    /// `MkdirAll`: creates `path` and any missing parents. CREATE in the
    /// compound engine only ever asks for one leaf component, but the
    /// contract is specified more generally as `MkdirAll`.
    async fn mkdir_all(&self, path: &str) -> VfsResult<()>;

    /// Directory listing, returning `FileInfo` records for each child.
    async fn read_dir(&self, path: &str) -> VfsResult<Vec<FileInfo>>;
}
