//! Open file and directory handles.

use rustc_hash::FxHashMap;
use tracing::warn;

use super::{DirEntry, FileHandle, InodeAddr};

/// What an open handle refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleKind {
    /// An open regular file.
    File,
    /// An open directory. Holds the listing snapshot of the current session, if one was taken.
    Dir(Option<Vec<DirEntry>>),
}

/// An open-session handle. Holds no descriptor and does not own the inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenHandle {
    /// The inode the handle was opened against.
    pub addr: InodeAddr,
    /// File or directory session state.
    pub kind: HandleKind,
}

/// Monotonically increasing handle allocator plus the map of currently open handles.
#[derive(Debug)]
#[must_use]
pub struct HandleTable {
    next_fh: FileHandle,
    open: FxHashMap<FileHandle, OpenHandle>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// An empty table. The first handle issued is 1.
    pub fn new() -> Self {
        Self {
            next_fh: 1,
            open: FxHashMap::default(),
        }
    }

    /// Open a file handle bound to `addr`.
    pub fn open_file(&mut self, addr: InodeAddr) -> FileHandle {
        self.insert(OpenHandle {
            addr,
            kind: HandleKind::File,
        })
    }

    /// Open a directory handle bound to `addr` with no snapshot yet.
    pub fn open_dir(&mut self, addr: InodeAddr) -> FileHandle {
        self.insert(OpenHandle {
            addr,
            kind: HandleKind::Dir(None),
        })
    }

    fn insert(&mut self, handle: OpenHandle) -> FileHandle {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.open.insert(fh, handle);
        fh
    }

    /// Whether `fh` is an open directory handle.
    #[must_use]
    pub fn is_dir(&self, fh: FileHandle) -> bool {
        self.open
            .get(&fh)
            .is_some_and(|h| matches!(h.kind, HandleKind::Dir(_)))
    }

    /// The listing snapshot stored on directory handle `fh`, if any.
    #[must_use]
    pub fn snapshot(&self, fh: FileHandle) -> Option<&[DirEntry]> {
        match self.open.get(&fh)?.kind {
            HandleKind::Dir(Some(ref entries)) => Some(entries.as_slice()),
            HandleKind::Dir(None) | HandleKind::File => None,
        }
    }

    /// Replace the listing snapshot of directory handle `fh`.
    ///
    /// Returns `false` if `fh` is not an open directory handle.
    pub fn set_snapshot(&mut self, fh: FileHandle, entries: Vec<DirEntry>) -> bool {
        match self.open.get_mut(&fh) {
            Some(OpenHandle {
                kind: HandleKind::Dir(slot),
                ..
            }) => {
                *slot = Some(entries);
                true
            }
            Some(_) | None => {
                warn!(fh, "snapshot stored on a handle that is not an open directory");
                false
            }
        }
    }

    /// Close `fh`, returning what it referred to.
    pub fn close(&mut self, fh: FileHandle) -> Option<OpenHandle> {
        self.open.remove(&fh)
    }

    /// Number of currently open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Whether no handle is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::INodeType;

    #[test]
    fn handles_are_monotonic_and_never_reused() {
        let mut table = HandleTable::new();
        let a = table.open_file(2);
        assert!(table.close(a).is_some());
        let b = table.open_file(2);
        assert!(b > a);
    }

    #[test]
    fn snapshot_lives_on_dir_handles_only() {
        let mut table = HandleTable::new();
        let dir = table.open_dir(1);
        let file = table.open_file(2);
        let entries = vec![DirEntry {
            offset: 1,
            addr: 2,
            name: "a".into(),
            itype: INodeType::File,
        }];

        assert!(table.snapshot(dir).is_none());
        assert!(table.set_snapshot(dir, entries.clone()));
        assert_eq!(table.snapshot(dir), Some(entries.as_slice()));

        assert!(!table.set_snapshot(file, entries));
        assert!(table.snapshot(file).is_none());
    }

    #[test]
    fn fresh_table_starts_at_one_and_tracks_kinds() {
        let mut table = HandleTable::new();
        assert!(table.is_empty());

        let dir = table.open_dir(1);
        let file = table.open_file(2);
        assert_eq!(dir, 1);
        assert_eq!(table.len(), 2);
        assert!(table.is_dir(dir));
        assert!(!table.is_dir(file));
        assert!(!table.is_dir(99));

        table.close(dir);
        table.close(file);
        assert!(table.is_empty());
    }
}
