//! The owned aggregate that serves every protocol operation.
//!
//! [`CloneFs`] mirrors a single flat backing directory. The root is the only directory; every
//! other inode is a regular file keyed by its name. Operations take `&mut self`, so callers
//! serialize them and every inode-table mutation is race free without locks.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};

use super::attr::{self, Owner};
use super::dirsync;
use super::handles::HandleTable;
use super::inode_table::{InodeTable, Released};
use super::passthrough;
use super::{
    DirEntry, FileHandle, FsError, FsStats, INodeType, InodeAddr, InodeAttr, InodeTableError,
    OpenFlags, ROOT_ADDR,
};

bitflags! {
    /// Flags accepted by [`CloneFs::rename`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenameFlags: u32 {
        /// Fail if the destination already exists.
        #[cfg(target_os = "linux")]
        const NOREPLACE = libc::RENAME_NOREPLACE;
        /// Atomically swap source and destination.
        #[cfg(target_os = "linux")]
        const EXCHANGE = libc::RENAME_EXCHANGE;
        /// Fail if the destination already exists.
        #[cfg(target_os = "macos")]
        const NOREPLACE = libc::RENAME_EXCL;
        /// Atomically swap source and destination.
        #[cfg(target_os = "macos")]
        const EXCHANGE = libc::RENAME_SWAP;
    }
}

/// Reject names that cannot live as a single entry of the backing directory.
fn validate_name(name: &OsStr) -> Result<(), FsError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || name == "." || name == ".." || bytes.contains(&b'/') {
        return Err(FsError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Flat passthrough filesystem over one backing directory.
#[derive(Debug)]
pub struct CloneFs {
    backing_dir: PathBuf,
    owner: Owner,
    inodes: InodeTable,
    handles: HandleTable,
}

impl CloneFs {
    /// Mirror `backing_dir`, creating it if it does not exist yet.
    ///
    /// The table starts with only the root; files already present are discovered lazily by
    /// `lookup` or on the first `readdir`.
    pub async fn new(backing_dir: impl Into<PathBuf>, owner: Owner) -> std::io::Result<Self> {
        let backing_dir = backing_dir.into();
        tokio::fs::create_dir_all(&backing_dir).await?;
        debug!(?backing_dir, ?owner, "initialized clone filesystem");

        Ok(Self {
            backing_dir,
            owner,
            inodes: InodeTable::new(),
            handles: HandleTable::new(),
        })
    }

    /// The directory being mirrored.
    #[must_use]
    pub fn backing_dir(&self) -> &Path {
        &self.backing_dir
    }

    /// Read-only view of the inode table.
    #[must_use]
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    /// Read-only view of the open handles.
    #[must_use]
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    fn backing_path(&self, name: &OsStr) -> PathBuf {
        self.backing_dir.join(name)
    }

    /// Only the root can parent anything.
    fn check_dir(&self, addr: InodeAddr) -> Result<(), FsError> {
        if addr == ROOT_ADDR {
            Ok(())
        } else if self.inodes.contains(addr) {
            Err(FsError::NotADirectory(addr))
        } else {
            Err(FsError::NotFound)
        }
    }

    /// Resolve a file inode to its backing path.
    fn file_path(&self, addr: InodeAddr) -> Result<PathBuf, FsError> {
        let record = self.inodes.get(addr)?;
        if record.is_root() {
            return Err(FsError::IsADirectory(addr));
        }
        Ok(self.backing_path(&record.name))
    }

    /// Build attributes for `addr`, refreshing the cached size from the backing file.
    ///
    /// A failed stat probe falls back to the cached size instead of failing the call.
    async fn attr(&mut self, addr: InodeAddr) -> Result<InodeAttr, FsError> {
        let record = self.inodes.get(addr)?;
        if record.itype == INodeType::Directory {
            return Ok(attr::default_attr(record, 0, self.owner));
        }

        let path = self.backing_path(&record.name);
        let size = match passthrough::stat_size(&path).await {
            Some(live) => {
                self.inodes.set_size(addr, live)?;
                live
            }
            None => {
                let cached = self.inodes.get(addr)?.size;
                debug!(addr, ?path, cached, "stat probe failed, reporting cached size");
                cached
            }
        };
        Ok(attr::default_attr(self.inodes.get(addr)?, size, self.owner))
    }

    /// Index a backing file that appeared without going through this filesystem.
    async fn discover(&mut self, name: &OsStr) -> Result<InodeAddr, FsError> {
        if validate_name(name).is_err() {
            return Err(FsError::NotFound);
        }
        let meta = passthrough::probe(&self.backing_path(name))
            .await?
            .ok_or(FsError::NotFound)?;
        if meta.is_dir() {
            trace!(?name, "nested directories are not mirrored");
            return Err(FsError::NotFound);
        }

        let addr = self.inodes.allocate(name, meta.len(), 1)?;
        debug!(addr, ?name, size = meta.len(), "discovered out-of-band file on lookup");
        Ok(addr)
    }

    /// Resolve `name` under `parent` and take one kernel reference on it.
    ///
    /// A name missing from the table but present as a plain file in the backing directory is
    /// discovered and allocated here, so a name evicted by `forget` can be looked up again.
    /// [`InodeTable::lookup`] is the strict variant: it consults only the index and fails with
    /// `NotFound` for anything not yet synchronized.
    #[instrument(name = "CloneFs::lookup", skip(self))]
    pub async fn lookup(&mut self, parent: InodeAddr, name: &OsStr) -> Result<InodeAttr, FsError> {
        self.check_dir(parent)?;
        let addr = match self.inodes.lookup(name) {
            Ok(addr) => addr,
            Err(InodeTableError::NotFound) => self.discover(name).await?,
            Err(e) => return Err(e.into()),
        };
        self.attr(addr).await
    }

    /// Attributes of `addr`.
    #[instrument(name = "CloneFs::getattr", skip(self))]
    pub async fn getattr(&mut self, addr: InodeAddr) -> Result<InodeAttr, FsError> {
        self.attr(addr).await
    }

    /// Apply attribute changes. Only `size` is honored; it truncates or extends the backing file.
    #[instrument(name = "CloneFs::setattr", skip(self))]
    pub async fn setattr(
        &mut self,
        addr: InodeAddr,
        size: Option<u64>,
    ) -> Result<InodeAttr, FsError> {
        if let Some(size) = size {
            let path = self.file_path(addr)?;
            passthrough::truncate(&path, size).await?;
            self.inodes.set_size(addr, size)?;
        }
        self.attr(addr).await
    }

    /// Drop `nlookup` kernel references to `addr`.
    #[instrument(name = "CloneFs::forget", skip(self))]
    pub fn forget(&mut self, addr: InodeAddr, nlookup: u64) -> Released {
        self.inodes.release(addr, nlookup)
    }

    /// Apply several forgets in one pass.
    pub fn batch_forget(&mut self, forgets: &[(InodeAddr, u64)]) {
        for &(addr, nlookup) in forgets {
            self.forget(addr, nlookup);
        }
    }

    /// Open a session on file `addr`.
    #[instrument(name = "CloneFs::open", skip(self))]
    pub fn open(&mut self, addr: InodeAddr, flags: OpenFlags) -> Result<FileHandle, FsError> {
        self.file_path(addr)?;
        let fh = self.handles.open_file(addr);
        trace!(fh, "opened file handle");
        Ok(fh)
    }

    /// Read up to `len` bytes of `addr` starting at `offset`. Short reads happen at EOF.
    #[instrument(name = "CloneFs::read", skip(self))]
    pub async fn read(&mut self, addr: InodeAddr, offset: u64, len: u32) -> Result<Bytes, FsError> {
        let path = self.file_path(addr)?;
        Ok(passthrough::read_at(&path, offset, len).await?)
    }

    /// Write `data` into `addr` at `offset`. Returns the number of bytes written.
    #[instrument(name = "CloneFs::write", skip(self, data), fields(len = data.len()))]
    pub async fn write(
        &mut self,
        addr: InodeAddr,
        offset: u64,
        data: &[u8],
    ) -> Result<u32, FsError> {
        let path = self.file_path(addr)?;
        let written = passthrough::write_at(&path, offset, data).await?;

        let end = offset.saturating_add(u64::from(written));
        if end > self.inodes.get(addr)?.size {
            self.inodes.set_size(addr, end)?;
        }
        Ok(written)
    }

    /// Flush data and metadata of `addr` to stable storage.
    #[instrument(name = "CloneFs::fsync", skip(self))]
    pub async fn fsync(&mut self, addr: InodeAddr) -> Result<(), FsError> {
        let path = self.file_path(addr)?;
        Ok(passthrough::fsync(&path).await?)
    }

    /// Close file handle `fh`.
    #[instrument(name = "CloneFs::release", skip(self))]
    pub fn release(&mut self, fh: FileHandle) -> Result<(), FsError> {
        self.handles
            .close(fh)
            .map(|_| ())
            .ok_or(FsError::BadHandle(fh))
    }

    /// Open a listing session on directory `addr`.
    #[instrument(name = "CloneFs::opendir", skip(self))]
    pub fn opendir(&mut self, addr: InodeAddr) -> Result<FileHandle, FsError> {
        self.check_dir(addr)?;
        Ok(self.handles.open_dir(addr))
    }

    /// List the root from `offset`, feeding entries to `filler` until it reports a full buffer.
    ///
    /// Offset 0 re-synchronizes the table with the backing directory and stores a fresh snapshot
    /// on `fh`. Later calls page through that snapshot so offsets stay stable for the session.
    /// Returns how many entries were accepted.
    #[instrument(name = "CloneFs::readdir", skip(self, filler))]
    pub async fn readdir(
        &mut self,
        addr: InodeAddr,
        fh: FileHandle,
        offset: u64,
        filler: impl FnMut(&DirEntry) -> bool,
    ) -> Result<usize, FsError> {
        self.check_dir(addr)?;

        if offset == 0 || self.handles.snapshot(fh).is_none() {
            let entries = dirsync::sync(&mut self.inodes, &self.backing_dir).await?;
            if !self.handles.is_dir(fh) {
                warn!(fh, "readdir without an open directory handle, serving an unsaved listing");
                return Ok(emit(&entries, offset, filler));
            }
            self.handles.set_snapshot(fh, entries);
        }

        Ok(emit(self.handles.snapshot(fh).unwrap_or_default(), offset, filler))
    }

    /// Close directory handle `fh`, dropping its snapshot.
    #[instrument(name = "CloneFs::releasedir", skip(self))]
    pub fn releasedir(&mut self, fh: FileHandle) -> Result<(), FsError> {
        self.release(fh)
    }

    /// Create an empty file named `name` and open it.
    ///
    /// A record whose backing file vanished out-of-band is evicted first so the name can be
    /// reused.
    #[instrument(name = "CloneFs::create", skip(self))]
    pub async fn create(
        &mut self,
        parent: InodeAddr,
        name: &OsStr,
        flags: OpenFlags,
    ) -> Result<(InodeAttr, FileHandle), FsError> {
        self.check_dir(parent)?;
        validate_name(name)?;

        let path = self.backing_path(name);
        if passthrough::probe(&path).await?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        if let Ok(stale) = self.inodes.remove(name) {
            debug!(addr = stale.addr, "evicted stale record before create");
        }

        passthrough::create_empty(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                FsError::AlreadyExists
            } else {
                FsError::Io(e)
            }
        })?;
        let addr = self.inodes.allocate(name, 0, 1)?;
        let fh = self.handles.open_file(addr);

        Ok((self.attr(addr).await?, fh))
    }

    /// Remove `name` from the namespace and delete its backing file.
    ///
    /// The record goes first. If deleting the backing file then fails, the error is returned and
    /// the record is not restored; the next sync rediscovers the file under a new address.
    #[instrument(name = "CloneFs::unlink", skip(self))]
    pub async fn unlink(&mut self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        self.check_dir(parent)?;
        let record = self.inodes.remove(name)?;
        debug!(addr = record.addr, rc = record.rc, "removed record");

        passthrough::remove(&self.backing_path(&record.name)).await?;
        Ok(())
    }

    /// Move `name` to `newname`, replacing any existing destination unless `flags` say otherwise.
    #[instrument(name = "CloneFs::rename", skip(self))]
    pub async fn rename(
        &mut self,
        parent: InodeAddr,
        name: &OsStr,
        newparent: InodeAddr,
        newname: &OsStr,
        flags: u32,
    ) -> Result<(), FsError> {
        self.check_dir(parent)?;
        self.check_dir(newparent)?;
        validate_name(name)?;
        validate_name(newname)?;

        let flags = RenameFlags::from_bits_truncate(flags);
        if flags.contains(RenameFlags::EXCHANGE) {
            return Err(FsError::NotSupported);
        }
        if self.inodes.addr_of(name).is_none() {
            return Err(FsError::NotFound);
        }
        if name == newname {
            return Ok(());
        }

        let to = self.backing_path(newname);
        if flags.contains(RenameFlags::NOREPLACE) && passthrough::probe(&to).await?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        passthrough::rename(&self.backing_path(name), &to).await?;
        if let Ok(replaced) = self.inodes.remove(newname) {
            debug!(addr = replaced.addr, "rename replaced an existing record");
        }
        self.inodes.rename(name, newname)?;
        Ok(())
    }

    /// Capacity figures of the backing filesystem. The inode total is the live table size.
    #[allow(clippy::useless_conversion, reason = "statvfs field widths vary by platform")]
    pub fn statfs(&self) -> Result<FsStats, FsError> {
        let stat = nix::sys::statvfs::statvfs(self.backing_dir.as_path())
            .map_err(std::io::Error::from)?;

        Ok(FsStats {
            block_size: u32::try_from(stat.block_size()).unwrap_or(attr::BLOCK_SIZE),
            fragment_size: u32::try_from(stat.fragment_size()).unwrap_or(attr::BLOCK_SIZE),
            total_blocks: u64::from(stat.blocks()),
            free_blocks: u64::from(stat.blocks_free()),
            available_blocks: u64::from(stat.blocks_available()),
            total_inodes: self.inodes.len() as u64,
            free_inodes: u64::from(stat.files_free()),
            max_filename_length: u32::try_from(stat.name_max()).unwrap_or(255),
        })
    }
}

/// Feed `entries` past `offset` to `filler`, stopping at the first full-buffer signal.
fn emit(entries: &[DirEntry], offset: u64, mut filler: impl FnMut(&DirEntry) -> bool) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };

    let mut accepted = 0;
    for entry in entries.iter().skip(start) {
        if filler(entry) {
            trace!(offset = entry.offset, "buffer full, stopping listing");
            break;
        }
        accepted += 1;
    }
    accepted
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn names_that_cannot_be_single_entries_are_rejected() {
        for bad in ["", ".", "..", "a/b", "/"] {
            assert!(
                matches!(validate_name(OsStr::new(bad)), Err(FsError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_name(OsStr::new("..hidden")).is_ok());
    }

    #[test]
    fn emit_stops_when_the_buffer_fills() {
        let entries: Vec<DirEntry> = (1..=5)
            .map(|i| DirEntry {
                offset: i,
                addr: i + 10,
                name: format!("f{i}").into(),
                itype: INodeType::File,
            })
            .collect();

        let mut seen = Vec::new();
        let accepted = emit(&entries, 1, |e| {
            seen.push(e.offset);
            seen.len() > 2
        });
        assert_eq!(accepted, 2);
        assert_eq!(seen, vec![2, 3, 4]);

        assert_eq!(emit(&entries, 5, |_| false), 0);
        assert_eq!(emit(&entries, 99, |_| false), 0);
    }
}
