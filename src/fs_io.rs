//! Disk helpers shared by the local tier and the filesystem remote backend.
//!
//! Writes go to a temp file in the destination directory, are fsynced, and
//! are then renamed into place, so a reader never observes a partial object.

use futures::{StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use crate::remote::ObjectStream;

/// Size and md5 of bytes that were written or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub size: u64,
    pub md5: String,
}

/// Bytes streamed into a temp file next to their final destination, not yet
/// visible under the final name.
#[derive(Debug)]
pub struct Staged {
    tmp_path: PathBuf,
    pub written: Written,
}

impl Staged {
    /// Rename into place.
    pub async fn commit(self, path: &Path) -> io::Result<Written> {
        if let Err(err) = fs::rename(&self.tmp_path, path).await {
            let _ = fs::remove_file(&self.tmp_path).await;
            return Err(err);
        }
        Ok(self.written)
    }

    pub async fn discard(self) {
        let _ = fs::remove_file(&self.tmp_path).await;
    }
}

/// Stream into a fsynced temp file in the directory of `path`, computing
/// size and md5 on the way. The temp file is removed on every error path.
pub async fn stage_stream(path: &Path, stream: ObjectStream) -> io::Result<Staged> {
    let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
        io::Error::new(ErrorKind::Other, "object path missing parent directory")
    })?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

    match write_to(&tmp_path, stream).await {
        Ok(written) => Ok(Staged { tmp_path, written }),
        Err(err) => {
            let _ = fs::remove_file(&tmp_path).await;
            Err(err)
        }
    }
}

async fn write_to(path: &Path, stream: ObjectStream) -> io::Result<Written> {
    let mut file = File::create(path).await?;
    let mut digest = Context::new();
    let mut size: u64 = 0;

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        digest.consume(&chunk);
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok(Written {
        size,
        md5: format!("{:x}", digest.compute()),
    })
}

/// Stream into `path` atomically.
pub async fn write_stream_atomic(path: &Path, stream: ObjectStream) -> io::Result<Written> {
    stage_stream(path, stream).await?.commit(path).await
}

/// Size and md5 of a file on disk, `None` if it does not exist.
pub async fn file_digest(path: &Path) -> io::Result<Option<Written>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut digest = Context::new();
    let mut size: u64 = 0;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        size += n as u64;
        digest.consume(&buf[..n]);
    }
    Ok(Some(Written {
        size,
        md5: format!("{:x}", digest.compute()),
    }))
}

/// Open a file as an [`ObjectStream`], `None` if it does not exist.
pub async fn open_stream(path: &Path) -> io::Result<Option<ObjectStream>> {
    match File::open(path).await {
        Ok(file) => Ok(Some(ReaderStream::new(file).boxed())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Remove a file; returns false if it was already gone.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Recursively remove empty shard directories up to `stop`.
///
/// Stops when:
/// - directory not empty
/// - directory not found
/// - reached root
/// - encountered unexpected I/O errors
pub async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current: PathBuf = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => {
                if let Some(parent) = current.parent() {
                    current = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    fn stream_of(chunks: Vec<io::Result<Bytes>>) -> ObjectStream {
        stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn write_then_digest_agree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ab/cd/object");

        let written = write_stream_atomic(
            &path,
            stream_of(vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))]),
        )
        .await
        .unwrap();
        assert_eq!(written.size, 11);
        assert_eq!(written.md5, format!("{:x}", md5::compute(b"hello world")));

        let on_disk = file_digest(&path).await.unwrap().unwrap();
        assert_eq!(on_disk, written);
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ab/cd/object");

        let result = write_stream_atomic(
            &path,
            stream_of(vec![
                Ok(Bytes::from_static(b"partial")),
                Err(io::Error::new(ErrorKind::ConnectionReset, "reset")),
            ]),
        )
        .await;
        assert!(result.is_err());
        assert!(!path.exists());

        let leftovers = std::fs::read_dir(dir.path().join("ab/cd")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn empty_stream_writes_empty_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ab/cd/empty");

        let written = write_stream_atomic(&path, stream_of(vec![])).await.unwrap();
        assert_eq!(written.size, 0);
        assert_eq!(written.md5, format!("{:x}", md5::compute(b"")));
        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }

    #[tokio::test]
    async fn discarded_stage_is_invisible() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ab/cd/object");

        let staged = stage_stream(&path, stream_of(vec![Ok(Bytes::from_static(b"x"))]))
            .await
            .unwrap();
        assert_eq!(staged.written.size, 1);
        staged.discard().await;

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path().join("ab/cd")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn prune_stops_at_root() {
        let dir = TempDir::new().unwrap();
        let leaf = dir.path().join("ab/cd");
        std::fs::create_dir_all(&leaf).unwrap();

        prune_empty_dirs(&leaf, dir.path()).await;
        assert!(!dir.path().join("ab").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn missing_files_are_not_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope");
        assert!(file_digest(&path).await.unwrap().is_none());
        assert!(open_stream(&path).await.unwrap().is_none());
        assert!(!remove_if_exists(&path).await.unwrap());
    }
}
