#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use clone_fs::fs::attr::Owner;
use clone_fs::fs::{CloneFs, DirEntry, FileHandle, ROOT_ADDR};
use tempfile::TempDir;

/// A filesystem over a fresh temporary backing directory. The directory lives as long as the
/// returned guard.
pub async fn mount() -> (TempDir, CloneFs) {
    let dir = tempfile::tempdir().unwrap();
    let fs = CloneFs::new(dir.path(), Owner::default()).await.unwrap();
    (dir, fs)
}

/// Same as [`mount`], with `files` written to the backing directory before first use.
pub async fn mount_with(files: &[(&str, &[u8])]) -> (TempDir, CloneFs) {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    let fs = CloneFs::new(dir.path(), Owner::default()).await.unwrap();
    (dir, fs)
}

pub fn backing(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

/// Page through `fh` from `offset`, accepting at most `limit` entries per call, until a call
/// returns nothing.
pub async fn drain(fs: &mut CloneFs, fh: FileHandle, limit: usize) -> Vec<DirEntry> {
    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let mut page = Vec::new();
        fs.readdir(ROOT_ADDR, fh, offset, |entry| {
            if page.len() == limit {
                return true;
            }
            page.push(entry.clone());
            false
        })
        .await
        .unwrap();

        let Some(last) = page.last() else {
            return all;
        };
        offset = last.offset;
        all.extend(page);
    }
}

/// A whole listing session: opendir, read everything, releasedir.
pub async fn list(fs: &mut CloneFs) -> Vec<DirEntry> {
    let fh = fs.opendir(ROOT_ADDR).unwrap();
    let entries = drain(fs, fh, usize::MAX).await;
    fs.releasedir(fh).unwrap();
    entries
}

pub fn names(entries: &[DirEntry]) -> Vec<OsString> {
    entries.iter().map(|e| e.name.clone()).collect()
}

pub fn os(name: &str) -> &OsStr {
    OsStr::new(name)
}
