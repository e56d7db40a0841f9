//! Fixed default attributes for every inode.

use std::time::SystemTime;

use super::inode_table::InodeRecord;
use super::{INodeType, InodeAttr, InodePerms};

/// Preferred I/O size reported to the kernel.
pub const BLOCK_SIZE: u32 = 4096;

/// Fixed owner of every inode in the mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    /// Reported user id.
    pub uid: u32,
    /// Reported group id.
    pub gid: u32,
}

impl Default for Owner {
    fn default() -> Self {
        Self {
            uid: 1000,
            gid: 1000,
        }
    }
}

/// Build the attributes for `record`, reporting `size` as its length.
///
/// Timestamps are the wall clock at the time of the call. They are not persisted and say nothing
/// about real modification or creation time.
#[must_use]
pub fn default_attr(record: &InodeRecord, size: u64, owner: Owner) -> InodeAttr {
    InodeAttr {
        addr: record.addr,
        itype: record.itype,
        size: match record.itype {
            INodeType::File => size,
            INodeType::Directory => 0,
        },
        permissions: InodePerms::ALL_RWX,
        nlink: 1,
        uid: owner.uid,
        gid: owner.gid,
        time: SystemTime::now(),
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;
    use crate::fs::ROOT_ADDR;

    #[test]
    fn files_and_root_share_fixed_defaults() {
        let owner = Owner { uid: 7, gid: 8 };
        let file = InodeRecord {
            addr: 42,
            name: OsString::from("f"),
            size: 3,
            itype: INodeType::File,
            rc: 1,
        };
        let root = InodeRecord {
            addr: ROOT_ADDR,
            name: OsString::from("."),
            size: 0,
            itype: INodeType::Directory,
            rc: 1,
        };

        let file_attr = default_attr(&file, 11, owner);
        assert_eq!(file_attr.size, 11);
        assert_eq!(file_attr.permissions.bits(), 0o777);
        assert_eq!(file_attr.nlink, 1);
        assert_eq!((file_attr.uid, file_attr.gid), (7, 8));

        let root_attr = default_attr(&root, 99, owner);
        assert_eq!(root_attr.itype, INodeType::Directory);
        assert_eq!(root_attr.size, 0);
        assert_eq!(root_attr.permissions.bits(), 0o777);
    }
}
