//! The fixed tree served by hello-fs.
//!
//! ```text
//! /            (1)
//! ├── hello    (2)
//! └── dir      (3)
//!     └── world (4)
//! ```

/// What every file in the tree contains.
pub const CONTENT: &[u8] = b"Hello, world!";

pub const ROOT_INO: u64 = 1;
pub const HELLO_INO: u64 = 2;
pub const DIR_INO: u64 = 3;
pub const WORLD_INO: u64 = 4;

/// A named entry of a directory. Its listing offset is its position plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    pub ino: u64,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Dir { children: &'static [Child] },
    File { content: &'static [u8] },
}

/// Nodes indexed by `ino - 1`.
const NODES: [Node; 4] = [
    Node::Dir {
        children: &[
            Child {
                ino: HELLO_INO,
                name: "hello",
            },
            Child {
                ino: DIR_INO,
                name: "dir",
            },
        ],
    },
    Node::File { content: CONTENT },
    Node::Dir {
        children: &[Child {
            ino: WORLD_INO,
            name: "world",
        }],
    },
    Node::File { content: CONTENT },
];

/// The node with inode number `ino`, if there is one.
pub fn node(ino: u64) -> Option<&'static Node> {
    let index = usize::try_from(ino.checked_sub(1)?).ok()?;
    NODES.get(index)
}

/// Resolve `name` inside directory `parent`.
pub fn lookup(parent: u64, name: &str) -> Option<u64> {
    match node(parent)? {
        Node::Dir { children } => children.iter().find(|c| c.name == name).map(|c| c.ino),
        Node::File { .. } => None,
    }
}

/// Up to `size` bytes of `content` starting at `offset`. Empty past the end.
pub fn read_slice(content: &'static [u8], offset: u64, size: u32) -> &'static [u8] {
    let start = usize::try_from(offset).map_or(content.len(), |o| o.min(content.len()));
    let end = start.saturating_add(size as usize).min(content.len());
    &content[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_the_fixed_tree() {
        assert_eq!(lookup(ROOT_INO, "hello"), Some(HELLO_INO));
        assert_eq!(lookup(ROOT_INO, "dir"), Some(DIR_INO));
        assert_eq!(lookup(DIR_INO, "world"), Some(WORLD_INO));
        assert_eq!(lookup(ROOT_INO, "world"), None);
        assert_eq!(lookup(HELLO_INO, "anything"), None);
        assert_eq!(lookup(99, "hello"), None);
    }

    #[test]
    fn inode_zero_and_out_of_range_are_absent() {
        assert!(node(0).is_none());
        assert!(node(5).is_none());
        assert!(matches!(node(ROOT_INO), Some(Node::Dir { .. })));
        assert!(matches!(node(WORLD_INO), Some(Node::File { .. })));
    }

    #[test]
    fn reads_are_clamped_to_the_content() {
        assert_eq!(read_slice(CONTENT, 0, 5), b"Hello");
        assert_eq!(read_slice(CONTENT, 7, 100), b"world!");
        assert!(read_slice(CONTENT, 13, 4).is_empty());
        assert!(read_slice(CONTENT, u64::MAX, 4).is_empty());
    }
}
