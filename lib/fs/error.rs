//! Filesystem error types and their errno mapping.

use std::ffi::OsString;

use thiserror::Error;

use super::{FileHandle, InodeAddr};

/// Errors raised by [`InodeTable`](super::inode_table::InodeTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InodeTableError {
    /// No live record at that address or under that name.
    #[error("inode not found")]
    NotFound,

    /// Another live record already holds the name.
    #[error("name already indexed")]
    AlreadyExists,

    /// The root record is pinned.
    #[error("the root inode cannot be removed")]
    RootPinned,

    /// Every generation of every slot has been used.
    #[error("inode address space exhausted")]
    Exhausted,
}

/// Every error a filesystem operation can return to the kernel.
#[derive(Debug, Error)]
pub enum FsError {
    /// The inode or name is unknown, or its backing file is gone.
    #[error("no such entry")]
    NotFound,

    /// The target name is taken.
    #[error("entry already exists")]
    AlreadyExists,

    /// The operation has no meaning in a flat namespace.
    #[error("operation not supported")]
    NotSupported,

    /// A directory operation targeted a file.
    #[error("inode {0} is not a directory")]
    NotADirectory(InodeAddr),

    /// A file operation targeted the root.
    #[error("inode {0} is a directory")]
    IsADirectory(InodeAddr),

    /// Empty, `.`, `..`, or contains a `/`.
    #[error("invalid entry name {0:?}")]
    InvalidName(OsString),

    /// The handle was never issued or was already released.
    #[error("file handle {0} is not open")]
    BadHandle(FileHandle),

    /// The root record is pinned.
    #[error("the root inode cannot be removed")]
    RootPinned,

    /// Every generation of every slot has been used.
    #[error("inode address space exhausted")]
    Exhausted,

    /// Passthrough I/O against the backing directory failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InodeTableError> for FsError {
    fn from(e: InodeTableError) -> Self {
        match e {
            InodeTableError::NotFound => Self::NotFound,
            InodeTableError::AlreadyExists => Self::AlreadyExists,
            InodeTableError::RootPinned => Self::RootPinned,
            InodeTableError::Exhausted => Self::Exhausted,
        }
    }
}

impl FsError {
    /// The errno the kernel should see for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotSupported => libc::ENOTSUP,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::IsADirectory(_) => libc::EISDIR,
            Self::InvalidName(_) => libc::EINVAL,
            Self::BadHandle(_) => libc::EBADF,
            Self::RootPinned => libc::EBUSY,
            Self::Exhausted => libc::ENOSPC,
            Self::Io(io_err) => io_to_errno(io_err),
        }
    }
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        e.errno()
    }
}

/// Convert an I/O error to the corresponding errno value for FUSE replies.
pub fn io_to_errno(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or_else(|| match e.kind() {
        std::io::ErrorKind::NotFound => libc::ENOENT,
        std::io::ErrorKind::PermissionDenied => libc::EACCES,
        std::io::ErrorKind::AlreadyExists => libc::EEXIST,
        _ => libc::EIO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_for_every_kind() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists.errno(), libc::EEXIST);
        assert_eq!(FsError::NotSupported.errno(), libc::ENOTSUP);
        assert_eq!(FsError::NotADirectory(2).errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsADirectory(1).errno(), libc::EISDIR);
        assert_eq!(FsError::InvalidName("a/b".into()).errno(), libc::EINVAL);
        assert_eq!(FsError::BadHandle(7).errno(), libc::EBADF);
        assert_eq!(FsError::RootPinned.errno(), libc::EBUSY);
        assert_eq!(FsError::Exhausted.errno(), libc::ENOSPC);
    }

    #[test]
    fn io_errors_pass_raw_errno_through() {
        let err = FsError::from(std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(i32::from(err), libc::ENOSPC);
    }

    #[test]
    fn io_errors_without_raw_errno_map_by_kind() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(io_to_errno(&not_found), libc::ENOENT);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert_eq!(io_to_errno(&denied), libc::EACCES);

        let other = std::io::Error::other("weird");
        assert_eq!(io_to_errno(&other), libc::EIO);
    }

    #[test]
    fn table_errors_convert() {
        assert!(matches!(
            FsError::from(InodeTableError::NotFound),
            FsError::NotFound
        ));
        assert!(matches!(
            FsError::from(InodeTableError::AlreadyExists),
            FsError::AlreadyExists
        ));
    }
}
