//! Flat-namespace passthrough filesystem.
/// Default attribute values surfaced to the kernel.
pub mod attr;
/// The owned aggregate that serves every protocol operation.
pub mod clonefs;
/// Reconciles the inode table with the backing directory.
pub mod dirsync;
/// Error taxonomy and errno translation.
pub mod error;
/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`clonefs::CloneFs`].
pub mod fuser;
/// Ephemeral open-file and open-directory handles.
pub mod handles;
/// Inode arena with a reverse name index.
pub mod inode_table;
/// Backing-store file operations.
pub mod passthrough;

pub use clonefs::CloneFs;
pub use error::{FsError, InodeTableError};

use std::ffi::OsString;
use std::time::SystemTime;

use bitflags::bitflags;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Type representing a file handle.
pub type FileHandle = u64;

/// The reserved address of the root directory.
pub const ROOT_ADDR: InodeAddr = ::fuser::FUSE_ROOT_ID;

bitflags! {
    /// Permission bits for an inode, similar to Unix file permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InodePerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Other: read, write, and execute.
        const OTHER_RWX = Self::OTHER_READ.bits()
            | Self::OTHER_WRITE.bits()
            | Self::OTHER_EXECUTE.bits();
        /// Group: read, write, and execute.
        const GROUP_RWX = Self::GROUP_READ.bits()
            | Self::GROUP_WRITE.bits()
            | Self::GROUP_EXECUTE.bits();
        /// Owner: read, write, and execute.
        const OWNER_RWX = Self::OWNER_READ.bits()
            | Self::OWNER_WRITE.bits()
            | Self::OWNER_EXECUTE.bits();
        /// Everyone: read, write, and execute (`0o777`).
        const ALL_RWX = Self::OWNER_RWX.bits()
            | Self::GROUP_RWX.bits()
            | Self::OTHER_RWX.bits();
    }
}

bitflags! {
    /// Flags for opening a file, similar to Unix open(2) flags.
    ///
    /// Only carried for logging; every passthrough call opens the backing file with the mode it
    /// needs regardless of what the kernel asked for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        /// Open for reading only.
        const RDONLY = libc::O_RDONLY;
        /// Open for writing only.
        const WRONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const RDWR = libc::O_RDWR;
        /// Append on each write.
        const APPEND = libc::O_APPEND;
        /// Truncate to zero length.
        const TRUNC = libc::O_TRUNC;
        /// Create file if it does not exist.
        const CREAT = libc::O_CREAT;
        /// Error if file already exists (with `CREAT`).
        const EXCL = libc::O_EXCL;
    }
}

/// The type of an inode entry in the filesystem.
///
/// The namespace is flat: the only directory is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum INodeType {
    /// A regular file mirrored from the backing directory.
    File,
    /// The root directory.
    Directory,
}

/// Attributes of an inode as surfaced to the kernel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeAttr {
    /// The address of this inode.
    pub addr: InodeAddr,
    /// File or directory.
    pub itype: INodeType,
    /// Size in bytes. Refreshed from the backing store whenever the stat probe succeeds.
    pub size: u64,
    /// Permission bits.
    pub permissions: InodePerms,
    /// Hard link count.
    pub nlink: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Timestamp reported for atime, mtime, ctime and crtime.
    pub time: SystemTime,
}

/// A single entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// The offset the kernel passes back to resume listing after this entry.
    pub offset: u64,
    /// The inode this entry names.
    pub addr: InodeAddr,
    /// The entry name within the root.
    pub name: OsString,
    /// Always [`INodeType::File`] for synchronized entries.
    pub itype: INodeType,
}

/// Filesystem statistics returned by [`CloneFs::statfs`].
///
/// Block-related sizes are in units of `block_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsStats {
    /// Filesystem block size (bytes).
    pub block_size: u32,
    /// Fragment size (bytes).
    pub fragment_size: u32,
    /// Total number of data blocks.
    pub total_blocks: u64,
    /// Number of free blocks.
    pub free_blocks: u64,
    /// Number of blocks available to unprivileged users.
    pub available_blocks: u64,
    /// Number of inodes currently known to the table.
    pub total_inodes: u64,
    /// Number of free file nodes on the backing filesystem.
    pub free_inodes: u64,
    /// Maximum filename length (bytes).
    pub max_filename_length: u32,
}
