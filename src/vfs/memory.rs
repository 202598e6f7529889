//! An in-memory [`Vfs`] backend: a `State` of `Entry` records keyed by both
//! fileid and path, with a monotonic `next_fileid` counter. Exists to make
//! the protocol engine testable and demoable; a host-OS-backed VFS is out
//! of scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    handle_for_fileid, FileHandle, FileInfo, FileTime, OpenFlags, Vfs, VfsError, VfsFile,
    VfsResult,
};

fn now() -> FileTime {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    FileTime { seconds: d.as_secs() as i64, nanos: d.subsec_nanos() }
}

fn split_parent(path: &str) -> (&str, &str) {
    if path == "/" {
        return ("/", "");
    }
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

enum EntryKind {
    Directory { children: BTreeMap<String, u64> },
    File { data: Vec<u8> },
}

struct Entry {
    fileid: u64,
    path: String,
    mode: u32,
    atime: FileTime,
    mtime: FileTime,
    ctime: FileTime,
    kind: EntryKind,
}

impl Entry {
    fn info(&self) -> FileInfo {
        let (is_directory, size, num_links) = match &self.kind {
            EntryKind::Directory { children } => (true, 0, children.len() as u32 + 2),
            EntryKind::File { data } => (false, data.len() as u64, 1),
        };
        let name = split_parent(&self.path).1;
        let name = if self.path == "/" { "/".to_string() } else { name.to_string() };
        FileInfo {
            name,
            fileid: self.fileid,
            is_directory,
            mode: self.mode,
            size,
            num_links,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}

struct State {
    by_id: HashMap<u64, Entry>,
    by_path: HashMap<String, u64>,
}

impl State {
    fn new() -> Self {
        let root = Entry {
            fileid: 1,
            path: "/".to_string(),
            mode: 0o755,
            atime: now(),
            mtime: now(),
            ctime: now(),
            kind: EntryKind::Directory { children: BTreeMap::new() },
        };
        let mut by_id = HashMap::new();
        let mut by_path = HashMap::new();
        by_path.insert("/".to_string(), 1);
        by_id.insert(1, root);
        State { by_id, by_path }
    }

    fn lookup_id(&self, path: &str) -> VfsResult<u64> {
        self.by_path.get(path).copied().ok_or(VfsError::NotFound)
    }

    fn entry(&self, path: &str) -> VfsResult<&Entry> {
        let id = self.lookup_id(path)?;
        self.by_id.get(&id).ok_or(VfsError::NotFound)
    }

    fn entry_mut(&mut self, path: &str) -> VfsResult<&mut Entry> {
        let id = self.lookup_id(path)?;
        self.by_id.get_mut(&id).ok_or(VfsError::NotFound)
    }

    fn children_of(&self, path: &str) -> VfsResult<&BTreeMap<String, u64>> {
        match &self.entry(path)?.kind {
            EntryKind::Directory { children } => Ok(children),
            EntryKind::File { .. } => Err(VfsError::NotDir),
        }
    }
}

/// A tiny, in-memory [`Vfs`] implementation. Thread-safe via an internal
/// `RwLock`, and shared across every connection on the server. The state
/// lives behind an `Arc` so open file objects can hold their own cheap,
/// owned reference to it instead of borrowing `&InMemoryVfs`.
pub struct InMemoryVfs {
    state: Arc<RwLock<State>>,
    next_fileid: AtomicU64,
}

impl Default for InMemoryVfs {
    fn default() -> Self {
        InMemoryVfs { state: Arc::new(RwLock::new(State::new())), next_fileid: AtomicU64::new(2) }
    }
}

impl InMemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> u64 {
        self.next_fileid.fetch_add(1, Ordering::Relaxed)
    }

    async fn insert_child(
        &self,
        parent: &str,
        name: &str,
        is_dir: bool,
        mode: u32,
    ) -> VfsResult<u64> {
        let mut state = self.state.write().await;
        if state.by_path.contains_key(&join(parent, name)) {
            return Err(VfsError::Exist);
        }
        if !matches!(state.entry(parent)?.kind, EntryKind::Directory { .. }) {
            return Err(VfsError::NotDir);
        }
        let id = self.alloc_id();
        let path = join(parent, name);
        let kind = if is_dir {
            EntryKind::Directory { children: BTreeMap::new() }
        } else {
            EntryKind::File { data: Vec::new() }
        };
        let entry = Entry { fileid: id, path: path.clone(), mode, atime: now(), mtime: now(), ctime: now(), kind };
        state.by_id.insert(id, entry);
        state.by_path.insert(path.clone(), id);
        if let EntryKind::Directory { children } = &mut state.entry_mut(parent)?.kind {
            children.insert(name.to_string(), id);
        }
        Ok(id)
    }
}

#[async_trait]
impl Vfs for InMemoryVfs {
    async fn root_handle(&self) -> FileHandle {
        handle_for_fileid(1)
    }

    async fn stat(&self, path: &str) -> VfsResult<FileInfo> {
        let state = self.state.read().await;
        Ok(state.entry(path)?.info())
    }

    async fn resolve_handle(&self, handle: &FileHandle) -> VfsResult<String> {
        let fileid = super::fileid_for_handle(handle)?;
        let state = self.state.read().await;
        state.by_id.get(&fileid).map(|e| e.path.clone()).ok_or(VfsError::BadHandle)
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn VfsFile>> {
        let state = self.state.read().await;
        let entry = state.entry(path)?;
        if matches!(entry.kind, EntryKind::Directory { .. }) {
            return Err(VfsError::IsDir);
        }
        let _ = flags;
        Ok(Box::new(MemoryFile { state: self.state.clone(), path: path.to_string() }))
    }

    async fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn VfsFile>> {
        let exists = self.state.read().await.by_path.contains_key(path);
        if !exists {
            if !flags.create {
                return Err(VfsError::NotFound);
            }
            let (parent, name) = split_parent(path);
            if name.is_empty() {
                return Err(VfsError::InvalidArgument);
            }
            self.insert_child(parent, name, false, mode).await?;
        }
        if flags.truncate {
            let mut state = self.state.write().await;
            if let EntryKind::File { data } = &mut state.entry_mut(path)?.kind {
                data.clear();
            }
        }
        self.open(path, flags).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> VfsResult<()> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(path)?;
        entry.mode = mode;
        entry.ctime = now();
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let mut state = self.state.write().await;
        let id = state.lookup_id(from)?;
        if state.by_path.contains_key(to) {
            return Err(VfsError::Exist);
        }
        let (from_parent, from_name) = split_parent(from);
        let (to_parent, to_name) = split_parent(to);
        state.by_path.remove(from);
        state.by_path.insert(to.to_string(), id);
        if let EntryKind::Directory { children } = &mut state.entry_mut(from_parent)?.kind {
            children.remove(from_name);
        }
        if let EntryKind::Directory { children } = &mut state.entry_mut(to_parent)?.kind {
            children.insert(to_name.to_string(), id);
        }
        let entry = state.by_id.get_mut(&id).ok_or(VfsError::NotFound)?;
        entry.path = to.to_string();
        entry.ctime = now();
        Ok(())
    }

    async fn remove(&self, path: &str) -> VfsResult<()> {
        let mut state = self.state.write().await;
        let id = state.lookup_id(path)?;
        if let EntryKind::Directory { children } = &state.by_id.get(&id).ok_or(VfsError::NotFound)?.kind {
            if !children.is_empty() {
                return Err(VfsError::NotEmpty);
            }
        }
        let (parent, name) = split_parent(path);
        if let EntryKind::Directory { children } = &mut state.entry_mut(parent)?.kind {
            children.remove(name);
        }
        state.by_path.remove(path);
        state.by_id.remove(&id);
        Ok(())
    }

    async fn mkdir_all(&self, path: &str) -> VfsResult<()> {
        let mut built = String::new();
        for component in path.trim_matches('/').split('/') {
            if component.is_empty() {
                continue;
            }
            let parent = if built.is_empty() { "/".to_string() } else { built.clone() };
            built = join(&parent, component);
            let exists = self.state.read().await.by_path.contains_key(&built);
            if !exists {
                self.insert_child(&parent, component, true, 0o755).await?;
            }
        }
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> VfsResult<Vec<FileInfo>> {
        let state = self.state.read().await;
        let children = state.children_of(path)?;
        Ok(children
            .values()
            .filter_map(|id| state.by_id.get(id).map(Entry::info))
            .collect())
    }
}

/// A file handle into [`InMemoryVfs`]. Holds a clone of the VFS's shared
/// state and re-resolves the entry by path on every call rather than
/// caching a fileid, so renames observed between calls are honored (the
/// VFS contract makes no promise about snapshot isolation across calls).
struct MemoryFile {
    state: Arc<RwLock<State>>,
    path: String,
}

#[async_trait]
impl VfsFile for MemoryFile {
    async fn read(&self, offset: u64, count: u32) -> VfsResult<(Vec<u8>, bool)> {
        let state = self.state.read().await;
        let data = match &state.entry(&self.path)?.kind {
            EntryKind::File { data } => data,
            EntryKind::Directory { .. } => return Err(VfsError::IsDir),
        };
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok((Vec::new(), true));
        }
        let end = (offset + count as usize).min(data.len());
        let eof = end >= data.len();
        Ok((data[offset..end].to_vec(), eof))
    }

    async fn write(&self, offset: u64, buf: &[u8]) -> VfsResult<u32> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(&self.path)?;
        let data = match &mut entry.kind {
            EntryKind::File { data } => data,
            EntryKind::Directory { .. } => return Err(VfsError::IsDir),
        };
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        entry.mtime = now();
        entry.ctime = now();
        Ok(buf.len() as u32)
    }

    async fn truncate(&self, size: u64) -> VfsResult<()> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(&self.path)?;
        match &mut entry.kind {
            EntryKind::File { data } => data.resize(size as usize, 0),
            EntryKind::Directory { .. } => return Err(VfsError::IsDir),
        }
        entry.mtime = now();
        entry.ctime = now();
        Ok(())
    }

    async fn sync(&self) -> VfsResult<()> {
        Ok(())
    }

    async fn close(&self) -> VfsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OpenFlags;

    #[tokio::test]
    async fn root_exists_and_is_directory() {
        let vfs = InMemoryVfs::new();
        let info = vfs.stat("/").await.unwrap();
        assert!(info.is_directory);
        assert_eq!(info.mode, 0o755);
    }

    #[tokio::test]
    async fn mkdir_all_then_lookup() {
        let vfs = InMemoryVfs::new();
        vfs.mkdir_all("/a/b").await.unwrap();
        let info = vfs.stat("/a/b").await.unwrap();
        assert!(info.is_directory);
        let root_children = vfs.read_dir("/").await.unwrap();
        assert_eq!(root_children.len(), 1);
        assert_eq!(root_children[0].name, "a");
    }

    #[tokio::test]
    async fn create_write_read_close_round_trip() {
        let vfs = InMemoryVfs::new();
        let flags = OpenFlags { read: true, write: true, create: true, truncate: false };
        let file = vfs.open_file("/a.txt", flags, 0o644).await.unwrap();
        let n = file.write(0, b"hello").await.unwrap();
        assert_eq!(n, 5);
        file.close().await.unwrap();

        let file = vfs.open("/a.txt", flags).await.unwrap();
        let (data, eof) = file.read(0, 1024).await.unwrap();
        assert_eq!(data, b"hello");
        assert!(eof);
    }

    #[tokio::test]
    async fn handle_round_trips_to_path() {
        let vfs = InMemoryVfs::new();
        vfs.mkdir_all("/dir").await.unwrap();
        let info = vfs.stat("/dir").await.unwrap();
        let handle = handle_for_fileid(info.fileid);
        assert_eq!(vfs.resolve_handle(&handle).await.unwrap(), "/dir");
    }

    #[tokio::test]
    async fn remove_nonempty_directory_fails() {
        let vfs = InMemoryVfs::new();
        vfs.mkdir_all("/dir").await.unwrap();
        let flags = OpenFlags { read: true, write: true, create: true, truncate: false };
        vfs.open_file("/dir/f", flags, 0o644).await.unwrap();
        assert_eq!(vfs.remove("/dir").await.unwrap_err(), VfsError::NotEmpty);
    }

    #[tokio::test]
    async fn rename_moves_entry_and_updates_parent_listings() {
        let vfs = InMemoryVfs::new();
        vfs.mkdir_all("/src").await.unwrap();
        vfs.mkdir_all("/dst").await.unwrap();
        let flags = OpenFlags { read: true, write: true, create: true, truncate: false };
        vfs.open_file("/src/f", flags, 0o644).await.unwrap();
        vfs.rename("/src/f", "/dst/f").await.unwrap();
        assert!(vfs.stat("/dst/f").await.is_ok());
        assert!(vfs.stat("/src/f").await.is_err());
        assert_eq!(vfs.read_dir("/src").await.unwrap().len(), 0);
        assert_eq!(vfs.read_dir("/dst").await.unwrap().len(), 1);
    }
}
