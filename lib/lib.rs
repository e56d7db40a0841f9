//! clone-fs shared library.

/// Flat passthrough filesystem and its FUSE adapter.
pub mod fs;
