//! FUSE availability checks, run before anything is mounted.

use std::path::Path;

#[cfg(target_os = "linux")]
const FUSE_DEVICE: &str = "/dev/fuse";

#[cfg(target_os = "macos")]
const MACFUSE_FS_BUNDLE: &str = "/Library/Filesystems/macfuse.fs";

#[cfg(target_os = "macos")]
const MACFUSE_MOUNT_HELPER: &str =
    "/Library/Filesystems/macfuse.fs/Contents/Resources/mount_macfuse";

/// Errors that can occur when verifying FUSE availability.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// The kernel module is not loaded, or the device node is missing.
    #[error(
        "{path} does not exist. Load the fuse kernel module (modprobe fuse) or install your \
         distribution's fuse3 package."
    )]
    DeviceMissing {
        /// Path where the device node was expected.
        path: &'static str,
    },

    /// macFUSE is not installed at all.
    #[error(
        "macFUSE is not installed. clone-fs requires macFUSE to mount filesystems.\n\
         Install it from: https://macfuse.github.io/"
    )]
    NotInstalled,

    /// The mount helper binary is missing.
    #[error(
        "macFUSE mount helper not found at {path}. Installation may be corrupt.\n\
         Reinstall from: https://macfuse.github.io/"
    )]
    MountHelperMissing {
        /// Path where the mount helper was expected.
        path: &'static str,
    },
}

fn require(path: &'static str, err: FuseCheckError) -> Result<(), FuseCheckError> {
    if Path::new(path).exists() {
        Ok(())
    } else {
        Err(err)
    }
}

/// Verify that FUSE is installed and usable on the current platform.
///
/// On Linux this checks for the `/dev/fuse` device node. On macOS it checks for the macFUSE
/// bundle and its mount helper.
#[cfg(target_os = "linux")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    require(
        FUSE_DEVICE,
        FuseCheckError::DeviceMissing { path: FUSE_DEVICE },
    )
}

/// Verify that FUSE is installed and usable on the current platform.
///
/// On Linux this checks for the `/dev/fuse` device node. On macOS it checks for the macFUSE
/// bundle and its mount helper.
#[cfg(target_os = "macos")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    require(MACFUSE_FS_BUNDLE, FuseCheckError::NotInstalled)?;
    require(
        MACFUSE_MOUNT_HELPER,
        FuseCheckError::MountHelperMissing {
            path: MACFUSE_MOUNT_HELPER,
        },
    )
}

/// Verify that FUSE is installed and usable on the current platform.
///
/// Other platforms are not probed; mounting reports any problem itself.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    Ok(())
}
