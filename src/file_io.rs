//! File access for transfers.
//!
//! Each session exclusively owns one file handle, opened exactly once when
//! the session is created and closed by drop on its terminal transition.
//! Write transfers must not clobber existing files, so the write side uses
//! `create_new` and lets the pre-existence check happen atomically in the
//! filesystem.

use std::io;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Open an existing file for a read transfer.
pub async fn open_for_read(path: &Path) -> io::Result<File> {
    File::open(path).await
}

/// Create the target of a write transfer, failing if it already exists.
pub async fn create_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

/// Fill `buf` from the file, stopping only at EOF.
///
/// Returns the number of bytes read; anything short of `buf.len()` means
/// the file is exhausted and this chunk is the transfer's final block.
pub async fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Append one received payload to the file.
pub async fn write_chunk(file: &mut File, payload: &[u8]) -> io::Result<()> {
    file.write_all(payload).await
}

/// Flush buffered writes once the final block has arrived.
pub async fn finish(file: &mut File) -> io::Result<()> {
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn read_chunk_fills_or_exhausts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.bin");
        tokio::fs::write(&path, vec![7u8; 700]).await.unwrap();

        let mut file = open_for_read(&path).await.unwrap();
        let mut buf = [0u8; 512];
        assert_eq!(read_chunk(&mut file, &mut buf).await.unwrap(), 512);
        assert_eq!(read_chunk(&mut file, &mut buf).await.unwrap(), 188);
        assert_eq!(read_chunk(&mut file, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_exclusive_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("present.txt");
        tokio::fs::write(&path, b"already here").await.unwrap();

        let err = create_exclusive(&path).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn write_chunks_then_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut file = create_exclusive(&path).await.unwrap();
        write_chunk(&mut file, &[1u8; 512]).await.unwrap();
        write_chunk(&mut file, &[2u8; 100]).await.unwrap();
        finish(&mut file).await.unwrap();
        drop(file);

        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written.len(), 612);
        assert_eq!(&written[..512], &[1u8; 512][..]);
        assert_eq!(&written[512..], &[2u8; 100][..]);
    }
}
