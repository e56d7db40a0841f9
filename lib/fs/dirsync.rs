//! Reconciles the inode table with the live backing directory.

use std::ffi::OsStr;
use std::fs::FileType;
use std::io;
use std::path::Path;

use tracing::{debug, trace};

use super::inode_table::InodeTable;
use super::{DirEntry, FsError, INodeType};

/// Reconcile `table` with the live contents of `backing_dir` and snapshot a listing.
///
/// Every non-directory entry without a namespace entry is allocated with no kernel references and
/// the size from its own metadata. Directories are skipped. Nothing is pruned: records whose
/// backing file vanished out-of-band stay in the table and fail lazily on next access.
///
/// The returned entries are sorted by name, and entry `i` carries offset `i + 1`.
pub async fn sync(table: &mut InodeTable, backing_dir: &Path) -> Result<Vec<DirEntry>, FsError> {
    let mut read_dir = tokio::fs::read_dir(backing_dir).await?;

    // The backing directory can change under us at any time, so the whole listing is re-read on
    // every sync.
    let mut found = Vec::new();
    while let Some(dir_entry) = read_dir.next_entry().await? {
        if is_listable(&dir_entry.file_name(), dir_entry.file_type().await)? {
            found.push(dir_entry);
        }
    }
    found.sort_by_key(tokio::fs::DirEntry::file_name);

    let mut entries = Vec::with_capacity(found.len());
    for dir_entry in found {
        let name = dir_entry.file_name();
        let addr = match table.addr_of(&name) {
            Some(addr) => addr,
            None => {
                let size = dir_entry.metadata().await.map_or(0, |meta| meta.len());
                let addr = table.allocate(&name, size, 0)?;
                debug!(addr, ?name, size, "discovered out-of-band file");
                addr
            }
        };

        entries.push(DirEntry {
            offset: entries.len() as u64 + 1,
            addr,
            name,
            itype: INodeType::File,
        });
    }

    Ok(entries)
}

/// Whether an entry of the given type belongs in the flat namespace.
///
/// Directories are skipped. So is an entry that vanished between the directory read and the type
/// probe.
fn is_listable(name: &OsStr, file_type: io::Result<FileType>) -> Result<bool, FsError> {
    match file_type {
        Ok(file_type) if file_type.is_dir() => {
            trace!(?name, "skipping nested directory");
            Ok(false)
        }
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!(?name, "entry vanished mid-scan, skipping");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn offsets_are_contiguous_after_skipping_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"").unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("c"), b"").unwrap();

        let mut table = InodeTable::new();
        let entries = sync(&mut table, dir.path()).await.unwrap();

        let offsets: Vec<_> = entries.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![1, 2]);
        assert!(table.addr_of(OsStr::new("b")).is_none());
    }

    #[tokio::test]
    async fn known_names_keep_their_address() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"xyz").unwrap();

        let mut table = InodeTable::new();
        let first = sync(&mut table, dir.path()).await.unwrap();
        let second = sync(&mut table, dir.path()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn vanished_entries_are_skipped_but_other_errors_abort() {
        let name = OsStr::new("gone");
        let vanished = Err(io::Error::from(io::ErrorKind::NotFound));
        assert!(!is_listable(name, vanished).unwrap());

        let denied = Err(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(is_listable(name, denied).is_err());
    }

    #[test]
    fn only_non_directories_are_listable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"").unwrap();

        let dir_type = std::fs::metadata(dir.path()).map(|m| m.file_type());
        let file_type = std::fs::metadata(&file).map(|m| m.file_type());
        assert!(!is_listable(OsStr::new("d"), dir_type).unwrap());
        assert!(is_listable(OsStr::new("f"), file_type).unwrap());
    }
}
