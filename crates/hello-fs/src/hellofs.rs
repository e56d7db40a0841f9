use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry};
use tracing::{debug, instrument};

use crate::tree::{self, Node};

const TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE: u32 = 512;

/// Serves the fixed tree in [`tree`]. Nothing is mutable, so the struct holds only the owner.
pub struct HelloFs {
    uid: u32,
    gid: u32,
}

impl Default for HelloFs {
    fn default() -> Self {
        Self::new()
    }
}

impl HelloFs {
    pub fn new() -> Self {
        Self {
            uid: nix::unistd::Uid::current().as_raw(),
            gid: nix::unistd::Gid::current().as_raw(),
        }
    }

    fn attr(&self, ino: u64, node: &Node) -> FileAttr {
        let now = SystemTime::now();
        let (kind, perm, size) = match node {
            Node::Dir { .. } => (FileType::Directory, 0o555, 0),
            Node::File { content } => (FileType::RegularFile, 0o444, content.len() as u64),
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind,
            perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

impl Filesystem for HelloFs {
    #[instrument(name = "HelloFs::lookup", skip(self, _req, reply))]
    fn lookup(&mut self, _req: &fuser::Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let found = name
            .to_str()
            .and_then(|name| tree::lookup(parent, name))
            .and_then(|ino| Some((ino, tree::node(ino)?)));
        match found {
            Some((ino, node)) => reply.entry(&TTL, &self.attr(ino, node), 0),
            None => reply.error(libc::ENOENT),
        }
    }

    #[instrument(name = "HelloFs::getattr", skip(self, _req, _fh, reply))]
    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match tree::node(ino) {
            Some(node) => reply.attr(&TTL, &self.attr(ino, node)),
            None => reply.error(libc::ENOENT),
        }
    }

    #[instrument(name = "HelloFs::open", skip(self, _req, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        match tree::node(ino) {
            Some(Node::File { .. }) if flags & libc::O_ACCMODE == libc::O_RDONLY => {
                reply.opened(0, 0);
            }
            Some(Node::File { .. }) => reply.error(libc::EACCES),
            Some(Node::Dir { .. }) => reply.error(libc::EISDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    #[instrument(
        name = "HelloFs::read",
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
        reply: ReplyData,
    ) {
        match tree::node(ino) {
            Some(Node::File { content }) => {
                let data = tree::read_slice(content, offset.cast_unsigned(), size);
                debug!(read_bytes = data.len(), "replying...");
                reply.data(data);
            }
            Some(Node::Dir { .. }) => reply.error(libc::EISDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    #[instrument(name = "HelloFs::opendir", skip(self, _req, _flags, reply))]
    fn opendir(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        match tree::node(ino) {
            Some(Node::Dir { .. }) => reply.opened(0, 0),
            Some(Node::File { .. }) => reply.error(libc::ENOTDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    #[instrument(name = "HelloFs::readdir", skip(self, _req, _fh, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let children = match tree::node(ino) {
            Some(Node::Dir { children }) => *children,
            Some(Node::File { .. }) => return reply.error(libc::ENOTDIR),
            None => return reply.error(libc::ENOENT),
        };

        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        for (next, child) in (1_i64..).zip(children.iter()).skip(start) {
            let kind = match tree::node(child.ino) {
                Some(Node::Dir { .. }) => FileType::Directory,
                Some(Node::File { .. }) | None => FileType::RegularFile,
            };
            if reply.add(child.ino, next, kind, child.name) {
                debug!("buffer full for now, stopping readdir");
                break;
            }
        }
        reply.ok();
    }
}
