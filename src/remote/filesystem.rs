//! Directory-backed remote tier.
//!
//! Objects live under `{root}/{aa}/{bb}/{hash}`, the same layout as the local
//! tier. Integrity is checked by hashing the stored file on `head`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{DEFAULT_MAX_OBJECT_SIZE, ObjectStream, RemoteClient, RemoteKind, RemoteObjectMeta};
use crate::{
    errors::{TierError, TierResult},
    fs_io,
    models::ContentHash,
};

#[derive(Debug, Clone)]
pub struct FilesystemRemote {
    root: PathBuf,
    max_object_size: u64,
}

impl FilesystemRemote {
    /// Open (and create if needed) a remote tier rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> TierResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
        })
    }

    pub fn with_max_object_size(mut self, limit: u64) -> Self {
        self.max_object_size = limit;
        self
    }

    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.relative_path())
    }
}

#[async_trait]
impl RemoteClient for FilesystemRemote {
    fn kind(&self) -> RemoteKind {
        RemoteKind::Filesystem
    }

    async fn put(&self, hash: &ContentHash, stream: ObjectStream) -> TierResult<RemoteObjectMeta> {
        let path = self.object_path(hash);
        let written = fs_io::write_stream_atomic(&path, stream)
            .await
            .map_err(|err| TierError::remote("put", hash, err))?;
        debug!(contenthash = %hash, bytes = written.size, "stored object on filesystem remote");
        Ok(RemoteObjectMeta {
            size: written.size,
            md5: written.md5,
        })
    }

    async fn get(&self, hash: &ContentHash) -> TierResult<ObjectStream> {
        fs_io::open_stream(&self.object_path(hash))
            .await
            .map_err(|err| TierError::remote("get", hash, err))?
            .ok_or_else(|| TierError::RemoteMissing {
                hash: hash.to_string(),
            })
    }

    async fn delete(&self, hash: &ContentHash) -> TierResult<()> {
        let path = self.object_path(hash);
        fs_io::remove_if_exists(&path)
            .await
            .map_err(|err| TierError::remote("delete", hash, err))?;
        if let Some(parent) = path.parent() {
            fs_io::prune_empty_dirs(parent, &self.root).await;
        }
        Ok(())
    }

    async fn head(&self, hash: &ContentHash) -> TierResult<Option<RemoteObjectMeta>> {
        let digest = fs_io::file_digest(&self.object_path(hash))
            .await
            .map_err(|err| TierError::remote("head", hash, err))?;
        Ok(digest.map(|written| RemoteObjectMeta {
            size: written.size,
            md5: written.md5,
        }))
    }

    fn max_object_size(&self) -> u64 {
        self.max_object_size
    }
}
