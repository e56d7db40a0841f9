//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`CloneFs`].

use std::ffi::OsStr;
use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, info, instrument};

use super::attr::BLOCK_SIZE;
use super::{CloneFs, FsError, INodeType, InodeAddr, InodeAttr, OpenFlags};

/// Trait abstracting the `.error(errno)` method common to all fuser reply types.
trait FuseReply {
    fn error(self, errno: i32);
}

macro_rules! impl_fuse_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl FuseReply for $ty {
            fn error(self, errno: i32) {
                // Calls the inherent fuser method (not this trait method).
                self.error(errno);
            }
        })*
    };
}

impl_fuse_reply!(
    fuser::ReplyEntry,
    fuser::ReplyAttr,
    fuser::ReplyData,
    fuser::ReplyOpen,
    fuser::ReplyWrite,
    fuser::ReplyEmpty,
    fuser::ReplyCreate,
    fuser::ReplyStatfs,
    fuser::ReplyXattr,
);

/// Extension trait on `Result<T, FsError>` for FUSE reply handling.
///
/// Centralizes the error-logging + errno-reply path so each FUSE callback
/// only has to express its success path.
trait FuseResultExt<T> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R));
}

impl<T> FuseResultExt<T> for Result<T, FsError> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R)) {
        match self {
            Ok(val) => on_ok(val, reply),
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
            }
        }
    }
}

/// Reply `ENOTSUP` to an operation the flat namespace has no counterpart for.
fn unsupported<R: FuseReply>(op: &'static str, reply: R) {
    debug!(op, "operation not supported");
    reply.error(FsError::NotSupported.errno());
}

/// Convert an [`InodeAttr`] to the fuser-specific `FileAttr`.
fn inode_to_fuser_attr(attr: &InodeAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: attr.addr,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.time,
        mtime: attr.time,
        ctime: attr.time,
        crtime: attr.time,
        kind: inode_type_to_fuser(attr.itype),
        perm: attr.permissions.bits(),
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn inode_type_to_fuser(itype: INodeType) -> fuser::FileType {
    match itype {
        INodeType::Directory => fuser::FileType::Directory,
        INodeType::File => fuser::FileType::RegularFile,
    }
}

/// Bridges [`CloneFs`] to the [`fuser::Filesystem`] trait.
///
/// fuser dispatches every callback with `&mut self` from its session thread, so each operation
/// runs to completion on the tokio runtime before the next one starts.
pub struct FuserAdapter {
    fs: CloneFs,
    runtime: tokio::runtime::Handle,
}

impl FuserAdapter {
    // TODO: Entries are cached by the kernel for this long, so out-of-band changes to the backing
    // directory can take up to a second to show. notify_inval_entry on sync would let this grow.
    const SHAMEFUL_TTL: std::time::Duration = std::time::Duration::from_secs(1);

    /// Wrap `fs`, blocking on `runtime` for every async operation.
    pub fn new(fs: CloneFs, runtime: tokio::runtime::Handle) -> Self {
        Self { fs, runtime }
    }
}

impl fuser::Filesystem for FuserAdapter {
    fn destroy(&mut self) {
        info!(
            inodes = self.fs.inodes().len(),
            open_handles = self.fs.handles().len(),
            "filesystem unmounted"
        );
    }

    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        self.runtime
            .block_on(self.fs.lookup(parent, name))
            .fuse_reply(reply, |attr, reply| {
                let f_attr = inode_to_fuser_attr(&attr);
                debug!(?f_attr, "replying...");
                reply.entry(&Self::SHAMEFUL_TTL, &f_attr, 0);
            });
    }

    #[instrument(name = "FuserAdapter::forget", skip(self, _req))]
    fn forget(&mut self, _req: &fuser::Request<'_>, ino: u64, nlookup: u64) {
        let outcome = self.fs.forget(ino, nlookup);
        debug!(?outcome, "forgot");
    }

    #[instrument(name = "FuserAdapter::batch_forget", skip(self, _req, nodes), fields(count = nodes.len()))]
    fn batch_forget(&mut self, _req: &fuser::Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        self.fs.batch_forget(&forget_pairs(nodes));
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        self.runtime
            .block_on(self.fs.getattr(ino))
            .fuse_reply(reply, |attr, reply| {
                let attr = inode_to_fuser_attr(&attr);
                debug!(?attr, "replying...");
                reply.attr(&Self::SHAMEFUL_TTL, &attr);
            });
    }

    #[instrument(
        name = "FuserAdapter::setattr",
        skip(self, _req, mode, uid, gid, atime, mtime, _ctime, _fh, _crtime, _chgtime, _bkuptime, _flags, reply)
    )]
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        if mode.is_some() || uid.is_some() || gid.is_some() || atime.is_some() || mtime.is_some() {
            debug!("ignoring attribute changes other than size");
        }
        self.runtime
            .block_on(self.fs.setattr(ino, size))
            .fuse_reply(reply, |attr, reply| {
                let attr = inode_to_fuser_attr(&attr);
                debug!(?attr, "replying...");
                reply.attr(&Self::SHAMEFUL_TTL, &attr);
            });
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, flags, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let flags = OpenFlags::from_bits_truncate(flags);
        self.fs.open(ino, flags).fuse_reply(reply, |fh, reply| {
            debug!(handle = fh, "replying...");
            reply.opened(fh, 0);
        });
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _fh, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        self.runtime
            .block_on(self.fs.read(ino, offset.cast_unsigned(), size))
            .fuse_reply(reply, |data, reply| {
                debug!(read_bytes = data.len(), "replying...");
                reply.data(&data);
            });
    }

    #[instrument(
        name = "FuserAdapter::write",
        skip(self, _req, _fh, data, _write_flags, _flags, _lock_owner, reply),
        fields(len = data.len())
    )]
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        self.runtime
            .block_on(self.fs.write(ino, offset.cast_unsigned(), data))
            .fuse_reply(reply, |written, reply| {
                debug!(written, "replying...");
                reply.written(written);
            });
    }

    #[instrument(name = "FuserAdapter::flush", skip(self, _req, _lock_owner, reply))]
    fn flush(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: fuser::ReplyEmpty,
    ) {
        // Writes go straight to the backing file, so there is nothing buffered to flush.
        reply.ok();
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.release(fh).fuse_reply(reply, |(), reply| {
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::fsync", skip(self, _req, _fh, reply))]
    fn fsync(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.runtime
            .block_on(self.fs.fsync(ino))
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    #[instrument(name = "FuserAdapter::opendir", skip(self, _req, _flags, reply))]
    fn opendir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        self.fs.opendir(ino).fuse_reply(reply, |fh, reply| {
            debug!(handle = fh, "replying...");
            reply.opened(fh, 0);
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let result = self
            .runtime
            .block_on(self.fs.readdir(ino, fh, offset.cast_unsigned(), |entry| {
                let Ok(next) = i64::try_from(entry.offset) else {
                    debug!(offset = entry.offset, "entry offset too large for fuser, stopping");
                    return true;
                };
                reply.add(entry.addr, next, inode_type_to_fuser(entry.itype), &entry.name)
            }));

        match result {
            Ok(added) => {
                debug!(added, "finalizing reply...");
                reply.ok();
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
            }
        }
    }

    #[instrument(name = "FuserAdapter::releasedir", skip(self, _req, _ino, _flags, reply))]
    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.releasedir(fh).fuse_reply(reply, |(), reply| reply.ok());
    }

    #[instrument(name = "FuserAdapter::fsyncdir", skip(self, _req, _fh, _datasync, reply))]
    fn fsyncdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        self.fs.statfs().fuse_reply(reply, |stats, reply| {
            debug!(?stats, "replying...");
            reply.statfs(
                stats.total_blocks,
                stats.free_blocks,
                stats.available_blocks,
                stats.total_inodes,
                stats.free_inodes,
                stats.block_size,
                stats.max_filename_length,
                stats.fragment_size,
            );
        });
    }

    #[instrument(name = "FuserAdapter::create", skip(self, _req, _mode, _umask, flags, reply))]
    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let flags = OpenFlags::from_bits_truncate(flags);
        self.runtime
            .block_on(self.fs.create(parent, name, flags))
            .fuse_reply(reply, |(attr, fh), reply| {
                let f_attr = inode_to_fuser_attr(&attr);
                debug!(?f_attr, handle = fh, "replying...");
                reply.created(&Self::SHAMEFUL_TTL, &f_attr, 0, fh, 0);
            });
    }

    #[instrument(name = "FuserAdapter::unlink", skip(self, _req, reply))]
    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        self.runtime
            .block_on(self.fs.unlink(parent, name))
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    #[instrument(name = "FuserAdapter::rename", skip(self, _req, reply))]
    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        self.runtime
            .block_on(self.fs.rename(parent, name, newparent, newname, flags))
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        unsupported("mknod", reply);
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        unsupported("mkdir", reply);
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        unsupported("rmdir", reply);
    }

    fn symlink(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: fuser::ReplyEntry,
    ) {
        unsupported("symlink", reply);
    }

    fn readlink(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyData) {
        unsupported("readlink", reply);
    }

    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        unsupported("link", reply);
    }

    fn fallocate(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _length: i64,
        _mode: i32,
        reply: fuser::ReplyEmpty,
    ) {
        unsupported("fallocate", reply);
    }

    fn setxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: fuser::ReplyEmpty,
    ) {
        unsupported("setxattr", reply);
    }

    fn getxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: fuser::ReplyXattr,
    ) {
        unsupported("getxattr", reply);
    }

    fn listxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _size: u32,
        reply: fuser::ReplyXattr,
    ) {
        unsupported("listxattr", reply);
    }

    fn removexattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        unsupported("removexattr", reply);
    }
}

/// Flatten a kernel batch-forget request into `(addr, nlookup)` pairs.
fn forget_pairs(nodes: &[fuser::fuse_forget_one]) -> Vec<(InodeAddr, u64)> {
    nodes.iter().map(|n| (n.nodeid, n.nlookup)).collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::fs::attr::Owner;
    use crate::fs::{InodePerms, ROOT_ADDR};

    #[test]
    fn attrs_convert_field_for_field() {
        let time = SystemTime::UNIX_EPOCH;
        let attr = InodeAttr {
            addr: 42,
            itype: INodeType::File,
            size: 1025,
            permissions: InodePerms::ALL_RWX,
            nlink: 1,
            uid: 1000,
            gid: 1000,
            time,
        };

        let f_attr = inode_to_fuser_attr(&attr);
        assert_eq!(f_attr.ino, 42);
        assert_eq!(f_attr.kind, fuser::FileType::RegularFile);
        assert_eq!(f_attr.blocks, 3);
        assert_eq!(f_attr.perm, 0o777);
        assert_eq!(f_attr.blksize, BLOCK_SIZE);
        assert_eq!((f_attr.mtime, f_attr.crtime), (time, time));
    }

    #[test]
    fn root_converts_to_a_directory() {
        let attr = InodeAttr {
            addr: ROOT_ADDR,
            itype: INodeType::Directory,
            size: 0,
            permissions: InodePerms::ALL_RWX,
            nlink: 1,
            uid: 0,
            gid: 0,
            time: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(inode_to_fuser_attr(&attr).kind, fuser::FileType::Directory);
    }

    #[test]
    fn batch_forget_entries_flatten_in_order() {
        let nodes = [
            fuser::fuse_forget_one {
                nodeid: 7,
                nlookup: 2,
            },
            fuser::fuse_forget_one {
                nodeid: ROOT_ADDR,
                nlookup: 1,
            },
        ];
        assert_eq!(forget_pairs(&nodes), vec![(7, 2), (ROOT_ADDR, 1)]);
        assert!(forget_pairs(&[]).is_empty());
    }

    #[tokio::test]
    async fn batch_forget_request_evicts_released_inodes() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = CloneFs::new(dir.path(), Owner::default()).await.unwrap();
        let (attr, fh) = fs
            .create(ROOT_ADDR, OsStr::new("f"), OpenFlags::WRONLY)
            .await
            .unwrap();
        fs.release(fh).unwrap();

        let nodes = [fuser::fuse_forget_one {
            nodeid: attr.addr,
            nlookup: 1,
        }];
        fs.batch_forget(&forget_pairs(&nodes));

        assert!(fs.inodes().get(attr.addr).is_err());
        assert!(fs.inodes().get(ROOT_ADDR).is_ok());
    }
}
