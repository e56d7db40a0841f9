#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use clone_fs::fs::inode_table::Released;
use clone_fs::fs::{FsError, INodeType, OpenFlags, ROOT_ADDR};

use common::{backing, list, mount, mount_with, names, os};

#[tokio::test]
async fn lookup_of_unknown_name_is_not_found() {
    let (_dir, mut fs) = mount().await;

    let err = fs.lookup(ROOT_ADDR, os("never-made")).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound));
    assert_eq!(err.errno(), libc::ENOENT);
    assert_eq!(fs.inodes().len(), 1, "a failed lookup must not allocate");
}

#[tokio::test]
async fn create_then_lookup_returns_same_id_with_size_zero() {
    let (_dir, mut fs) = mount().await;

    let (created, fh) = fs
        .create(ROOT_ADDR, os("new.txt"), OpenFlags::WRONLY)
        .await
        .unwrap();
    fs.release(fh).unwrap();

    let looked_up = fs.lookup(ROOT_ADDR, os("new.txt")).await.unwrap();
    assert_eq!(looked_up.addr, created.addr);
    assert_eq!(looked_up.size, 0);
    assert_eq!(looked_up.itype, INodeType::File);
}

#[tokio::test]
async fn write_at_offset_reads_back_exactly() {
    let (_dir, mut fs) = mount().await;
    let (attr, _fh) = fs
        .create(ROOT_ADDR, os("f"), OpenFlags::RDWR)
        .await
        .unwrap();

    let payload = b"payload";
    assert_eq!(fs.write(attr.addr, 5, payload).await.unwrap(), 7);
    let data = fs.read(attr.addr, 5, 7).await.unwrap();
    assert_eq!(&data[..], payload);

    let attr = fs.getattr(attr.addr).await.unwrap();
    assert_eq!(attr.size, 12);
}

#[tokio::test]
async fn unlink_then_lookup_is_not_found_and_backing_is_gone() {
    let (dir, mut fs) = mount().await;
    let (_attr, fh) = fs
        .create(ROOT_ADDR, os("doomed"), OpenFlags::WRONLY)
        .await
        .unwrap();
    fs.release(fh).unwrap();

    fs.unlink(ROOT_ADDR, os("doomed")).await.unwrap();

    assert!(matches!(
        fs.lookup(ROOT_ADDR, os("doomed")).await,
        Err(FsError::NotFound)
    ));
    assert!(!backing(&dir, "doomed").exists());
}

#[tokio::test]
async fn forgetting_every_lookup_evicts_and_relookup_gets_a_greater_id() {
    let (_dir, mut fs) = mount().await;
    let (created, fh) = fs
        .create(ROOT_ADDR, os("cycle"), OpenFlags::WRONLY)
        .await
        .unwrap();
    fs.release(fh).unwrap();

    let first = fs.lookup(ROOT_ADDR, os("cycle")).await.unwrap();
    assert_eq!(first.addr, created.addr);
    assert_eq!(fs.inodes().get(first.addr).unwrap().rc, 2);

    assert_eq!(fs.forget(first.addr, 2), Released::Evicted);
    assert!(fs.inodes().get(first.addr).is_err());

    let second = fs.lookup(ROOT_ADDR, os("cycle")).await.unwrap();
    assert!(second.addr > first.addr);
    assert_eq!(fs.inodes().get(second.addr).unwrap().rc, 1);
}

#[tokio::test]
async fn out_of_band_file_is_discovered_by_the_next_listing() {
    let (dir, mut fs) = mount().await;
    assert!(list(&mut fs).await.is_empty());

    std::fs::write(backing(&dir, "dropped-in"), b"12345678").unwrap();

    let entries = list(&mut fs).await;
    assert_eq!(names(&entries), vec!["dropped-in"]);

    let record = fs.inodes().get(entries[0].addr).unwrap();
    assert!(record.addr > ROOT_ADDR);
    assert_eq!(record.size, 8);
    assert_eq!(record.rc, 0, "a listing is not a kernel lookup");
}

#[tokio::test]
async fn listing_at_or_past_the_end_yields_nothing() {
    let (_dir, mut fs) = mount_with(&[("a", b""), ("b", b"")]).await;
    let fh = fs.opendir(ROOT_ADDR).unwrap();

    let full = fs.readdir(ROOT_ADDR, fh, 0, |_| false).await.unwrap();
    assert_eq!(full, 2);

    for offset in [2, 3, 1000] {
        let mut seen = 0;
        let accepted = fs
            .readdir(ROOT_ADDR, fh, offset, |_| {
                seen += 1;
                false
            })
            .await
            .unwrap();
        assert_eq!((accepted, seen), (0, 0), "offset {offset}");
    }
}

#[tokio::test]
async fn create_write_read_unlink_leaves_an_empty_listing() {
    let (_dir, mut fs) = mount().await;

    let (attr, fh) = fs
        .create(ROOT_ADDR, os("a.txt"), OpenFlags::RDWR)
        .await
        .unwrap();
    assert_eq!(fs.write(attr.addr, 0, b"hi").await.unwrap(), 2);
    assert_eq!(&fs.read(attr.addr, 0, 2).await.unwrap()[..], b"hi");
    fs.release(fh).unwrap();

    fs.unlink(ROOT_ADDR, os("a.txt")).await.unwrap();
    assert!(list(&mut fs).await.is_empty());
}

#[tokio::test]
async fn preexisting_files_get_distinct_increasing_ids_on_first_listing() {
    let (_dir, mut fs) = mount_with(&[("b", b"bb"), ("a", b"a")]).await;

    let entries = list(&mut fs).await;
    assert_eq!(names(&entries), vec!["a", "b"]);
    assert!(entries[0].addr > ROOT_ADDR);
    assert!(entries[1].addr > entries[0].addr);
    assert_eq!(fs.inodes().len(), 3);
}
