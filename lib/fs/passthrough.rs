//! Backing-store file operations.
//!
//! Every call opens and closes its own descriptor. Nothing is cached, so repeated small reads and
//! writes pay the open cost each time, and concurrent calls never share a descriptor.

use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tracing::trace;

/// Create a zero-length file at `path`. Fails with `AlreadyExists` if any entry is there.
pub async fn create_empty(path: &Path) -> std::io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    Ok(())
}

/// Read up to `len` bytes at `offset`. Running past EOF yields a short read.
pub async fn read_at(path: &Path, offset: u64, len: u32) -> std::io::Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buffer = Vec::with_capacity(len as usize);
    file.take(u64::from(len)).read_to_end(&mut buffer).await?;

    trace!(?path, offset, requested = len, read = buffer.len(), "read");
    Ok(Bytes::from(buffer))
}

/// Write all of `data` at `offset` without truncating. Returns the number of bytes written.
///
/// Writing past EOF leaves a hole that the backing filesystem fills however it normally does.
pub async fn write_at(path: &Path, offset: u64, data: &[u8]) -> std::io::Result<u32> {
    let written = u32::try_from(data.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "write larger than u32::MAX bytes",
        )
    })?;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    // tokio hands the write to a blocking thread; flush so it lands before the descriptor drops.
    file.flush().await?;

    trace!(?path, offset, written, "wrote");
    Ok(written)
}

/// Set the length of the file at `path`, truncating or zero-extending it.
pub async fn truncate(path: &Path, size: u64) -> std::io::Result<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await?;
    file.set_len(size).await
}

/// Flush the file's data and metadata to stable storage.
pub async fn fsync(path: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(path).await?.sync_all().await
}

/// Remove the file at `path`.
pub async fn remove(path: &Path) -> std::io::Result<()> {
    tokio::fs::remove_file(path).await
}

/// Rename `from` to `to`, replacing `to` if it exists.
pub async fn rename(from: &Path, to: &Path) -> std::io::Result<()> {
    tokio::fs::rename(from, to).await
}

/// The live size of the file at `path`, or `None` if the stat probe fails.
pub async fn stat_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|meta| meta.len())
}

/// Metadata of whatever entry sits at `path`, without following symlinks.
///
/// `Ok(None)` means nothing is there; any other failure is surfaced.
pub async fn probe(path: &Path) -> std::io::Result<Option<std::fs::Metadata>> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
