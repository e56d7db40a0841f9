#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use clone_fs::fs::{FsError, OpenFlags, ROOT_ADDR};

use common::{backing, list, mount, mount_with, names, os};

#[tokio::test]
async fn unlink_of_an_unindexed_name_is_not_found() {
    let (dir, mut fs) = mount_with(&[("on-disk-only", b"x")]).await;

    assert!(matches!(
        fs.unlink(ROOT_ADDR, os("on-disk-only")).await,
        Err(FsError::NotFound)
    ));
    assert!(backing(&dir, "on-disk-only").exists());
}

#[tokio::test]
async fn failed_backing_delete_still_drops_the_record() {
    let (dir, mut fs) = mount_with(&[("half", b"x")]).await;
    let attr = fs.lookup(ROOT_ADDR, os("half")).await.unwrap();
    std::fs::remove_file(backing(&dir, "half")).unwrap();

    let err = fs.unlink(ROOT_ADDR, os("half")).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert!(fs.inodes().get(attr.addr).is_err(), "no rollback after a failed delete");
}

#[tokio::test]
async fn a_file_that_survives_a_failed_unlink_is_rediscovered_with_a_new_id() {
    let (dir, mut fs) = mount_with(&[("stuck", b"x")]).await;
    let attr = fs.lookup(ROOT_ADDR, os("stuck")).await.unwrap();

    // Swap the file for a directory of the same name so remove_file fails.
    std::fs::remove_file(backing(&dir, "stuck")).unwrap();
    std::fs::create_dir(backing(&dir, "stuck")).unwrap();
    assert!(fs.unlink(ROOT_ADDR, os("stuck")).await.is_err());
    std::fs::remove_dir(backing(&dir, "stuck")).unwrap();
    std::fs::write(backing(&dir, "stuck"), b"back").unwrap();

    let entries = list(&mut fs).await;
    assert_eq!(names(&entries), vec!["stuck"]);
    assert!(entries[0].addr > attr.addr);
}

#[tokio::test]
async fn unlink_ignores_outstanding_references() {
    let (_dir, mut fs) = mount().await;
    let (attr, _fh) = fs
        .create(ROOT_ADDR, os("busy"), OpenFlags::WRONLY)
        .await
        .unwrap();
    fs.lookup(ROOT_ADDR, os("busy")).await.unwrap();
    fs.lookup(ROOT_ADDR, os("busy")).await.unwrap();

    fs.unlink(ROOT_ADDR, os("busy")).await.unwrap();
    assert!(fs.inodes().get(attr.addr).is_err());
}

#[tokio::test]
async fn the_root_cannot_be_unlinked() {
    let (_dir, mut fs) = mount().await;

    let err = fs.unlink(ROOT_ADDR, os(".")).await.unwrap_err();
    assert!(matches!(err, FsError::RootPinned));
    assert!(fs.inodes().get(ROOT_ADDR).is_ok());
}
