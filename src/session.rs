//! Per-connection session state: the current and saved filehandles, the
//! registered client (if any), and the table of files opened on this
//! connection. One long-lived piece of state is threaded through every
//! request on a connection, generalized to the full
//! current-fh/saved-stack/client/open-file-table model the v4 COMPOUND
//! engine needs.
//!
//! `Cwd`/`SetCwd` and `CurrentHandle`/`SetCurrentHandle` name the same
//! underlying slot: this engine has no v3-specific notion of a working
//! directory distinct from the v4 current filehandle, so the two naming
//! pairs are implemented as aliases over one field (documented in
//! DESIGN.md).

use std::collections::HashMap;

use crate::vfs::{FileHandle, VfsFile};

/// Share-access/deny flags recorded alongside an open file. Only the
/// access side is meaningful here: this engine does not implement
/// OPEN_DOWNGRADE or share-reservation conflicts (non-goal: locking), but
/// still records what the client asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShareAccess {
    pub read: bool,
    pub write: bool,
}

/// An open file tracked by a session.
pub struct OpenFileState {
    pub path: String,
    pub file: Box<dyn VfsFile>,
    pub access: ShareAccess,
}

/// A registered NFSv4 client, produced by SETCLIENTID and confirmed by
/// SETCLIENTID_CONFIRM.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub verifier: [u8; 8],
    pub id_string: String,
    pub clientid: u64,
    pub confirmed: bool,
}

/// Per-connection state. One instance is created when a connection is
/// accepted and lives for the connection's lifetime; `clean_up` must run
/// on every exit path.
pub struct SessionState {
    current_fh: Option<FileHandle>,
    saved_stack: Vec<FileHandle>,
    client: Option<ClientRegistration>,
    open_files: HashMap<u64, OpenFileState>,
    next_stateid: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            current_fh: None,
            saved_stack: Vec::new(),
            client: None,
            open_files: HashMap::new(),
            // Seeded at 1000: stateid-seqids are never 0, which some
            // clients treat as a sentinel "no state" value.
            next_stateid: 1000,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(&self) -> Option<&FileHandle> {
        self.current_fh.as_ref()
    }

    pub fn set_cwd(&mut self, fh: FileHandle) {
        self.current_fh = Some(fh);
    }

    pub fn current_handle(&self) -> Option<&FileHandle> {
        self.current_fh.as_ref()
    }

    pub fn set_current_handle(&mut self, fh: FileHandle) {
        self.current_fh = Some(fh);
    }

    /// Pushes the current filehandle onto the saved-handle stack (SAVEFH).
    pub fn push_handle(&mut self) -> Option<()> {
        let fh = self.current_fh.clone()?;
        self.saved_stack.push(fh);
        Some(())
    }

    /// Pops the saved-handle stack into the current filehandle
    /// (RESTOREFH). Stack depth is bounded by SAVEFH-RESTOREFH counts
    /// within a well-formed compound; an empty stack here means the
    /// client sent an ill-formed compound.
    pub fn pop_handle(&mut self) -> Option<()> {
        let fh = self.saved_stack.pop()?;
        self.current_fh = Some(fh);
        Some(())
    }

    pub fn client_id(&self) -> Option<&ClientRegistration> {
        self.client.as_ref()
    }

    pub fn set_client(&mut self, client: ClientRegistration) {
        self.client = Some(client);
    }

    pub fn confirm_client(&mut self) -> bool {
        match &mut self.client {
            Some(c) => {
                c.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Records a newly opened file and returns its stateid-seqid.
    /// Monotonically increasing and never reused within a session's
    /// lifetime.
    pub fn add_opened_file(
        &mut self,
        path: String,
        file: Box<dyn VfsFile>,
        access: ShareAccess,
    ) -> u64 {
        let seqid = self.next_stateid;
        self.next_stateid += 1;
        self.open_files.insert(seqid, OpenFileState { path, file, access });
        seqid
    }

    pub fn get_opened_file(&self, seqid: u64) -> Option<&OpenFileState> {
        self.open_files.get(&seqid)
    }

    pub fn remove_opened_file(&mut self, seqid: u64) -> Option<OpenFileState> {
        self.open_files.remove(&seqid)
    }

    /// Closes every open file and clears the saved-handle stack. Must run
    /// on every connection exit path: normal close, I/O error, or task
    /// cancellation.
    pub async fn clean_up(&mut self) {
        for (_, state) in self.open_files.drain() {
            let _ = state.file.close().await;
        }
        self.saved_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stateid_seqids_are_monotonic_and_unique() {
        let mut session = SessionState::new();
        let a = session.add_opened_file("/a".into(), Box::new(NoopFile), ShareAccess::default());
        let b = session.add_opened_file("/b".into(), Box::new(NoopFile), ShareAccess::default());
        assert_eq!(a, 1000);
        assert_eq!(b, 1001);
        assert!(session.get_opened_file(a).is_some());
        assert!(session.remove_opened_file(a).is_some());
        assert!(session.get_opened_file(a).is_none());
    }

    #[test]
    fn saved_stack_push_pop_round_trips() {
        let mut session = SessionState::new();
        session.set_cwd(vec![1, 2, 3]);
        assert!(session.push_handle().is_some());
        session.set_cwd(vec![4, 5, 6]);
        assert!(session.pop_handle().is_some());
        assert_eq!(session.cwd(), Some(&vec![1, 2, 3]));
        // Stack is now empty; a second RESTOREFH is ill-formed.
        assert!(session.pop_handle().is_none());
    }

    struct NoopFile;

    #[async_trait::async_trait]
    impl VfsFile for NoopFile {
        async fn read(&self, _offset: u64, _count: u32) -> crate::vfs::VfsResult<(Vec<u8>, bool)> {
            Ok((Vec::new(), true))
        }
        async fn write(&self, _offset: u64, _data: &[u8]) -> crate::vfs::VfsResult<u32> {
            Ok(0)
        }
        async fn truncate(&self, _size: u64) -> crate::vfs::VfsResult<()> {
            Ok(())
        }
        async fn sync(&self) -> crate::vfs::VfsResult<()> {
            Ok(())
        }
        async fn close(&self) -> crate::vfs::VfsResult<()> {
            Ok(())
        }
    }
}
