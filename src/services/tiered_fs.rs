//! TieredFileSystem: both storage tiers behind one hash-addressed store.
//!
//! The local tier is a sharded directory tree under `local_root`; the remote
//! tier is any [`RemoteClient`]. Every transfer is copy, then verify, then
//! report: nothing here touches the registry's location column, callers
//! commit the returned location only after an operation succeeds.

use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::{TierError, TierResult},
    fs_io::{self, Written},
    models::{ContentHash, ObjectLocation},
    remote::{ObjectStream, RemoteClient, same_digest},
    services::{
        locks::{LockService, ObjectLock},
        registry::ObjectRegistry,
    },
};

/// Poll interval while waiting for a contended object lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a successful copy between tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Location the object is in once the copy is committed.
    pub location: ObjectLocation,
    pub bytes: u64,
    pub md5: String,
}

#[derive(Clone)]
pub struct TieredFileSystem {
    local_root: PathBuf,
    remote: Arc<dyn RemoteClient>,
    locks: Arc<dyn LockService>,
    registry: ObjectRegistry,
    lock_lease: Duration,
}

impl TieredFileSystem {
    /// Create the file system, making sure the local root exists.
    pub async fn new(
        local_root: impl Into<PathBuf>,
        remote: Arc<dyn RemoteClient>,
        locks: Arc<dyn LockService>,
        registry: ObjectRegistry,
    ) -> TierResult<Self> {
        let local_root = local_root.into();
        tokio::fs::create_dir_all(&local_root).await?;
        Ok(Self {
            local_root,
            remote,
            locks,
            registry,
            lock_lease: Duration::from_secs(600),
        })
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn local_root(&self) -> &PathBuf {
        &self.local_root
    }

    pub fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    /// `{local_root}/{aa}/{bb}/{hash}`.
    pub fn resolve_local_path(&self, hash: &ContentHash) -> PathBuf {
        self.local_root.join(hash.relative_path())
    }

    /// Key of the object on the remote tier, `{aa}/{bb}/{hash}`.
    pub fn resolve_remote_path(&self, hash: &ContentHash) -> PathBuf {
        hash.relative_path()
    }

    #[cfg(test)]
    pub(crate) async fn is_local_readable(&self, hash: &ContentHash) -> bool {
        tokio::fs::metadata(self.resolve_local_path(hash))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Size and md5 of the local copy, `None` if there is none.
    pub async fn local_digest(&self, hash: &ContentHash) -> TierResult<Option<Written>> {
        Ok(fs_io::file_digest(&self.resolve_local_path(hash)).await?)
    }

    /// Ingest bytes into the local tier. The write is atomic: concurrent
    /// readers see either the old file or the complete new one.
    pub async fn store_local(&self, hash: &ContentHash, stream: ObjectStream) -> TierResult<Written> {
        let written = fs_io::write_stream_atomic(&self.resolve_local_path(hash), stream).await?;
        debug!(contenthash = %hash, bytes = written.size, "stored local object");
        Ok(written)
    }

    /// Open an object for reading, preferring the local tier.
    pub async fn read_object(&self, hash: &ContentHash) -> TierResult<ObjectStream> {
        if let Some(stream) = fs_io::open_stream(&self.resolve_local_path(hash)).await? {
            return Ok(stream);
        }
        debug!(contenthash = %hash, "local copy missing, reading from remote tier");
        self.remote.get(hash).await
    }

    /// Copy the local object to the remote tier and verify it there.
    ///
    /// - Missing local source: `LocalMissing` (structural).
    /// - Remote bytes don't match the local md5: `VerificationFailed`.
    ///
    /// On success the object may be recorded as DUPLICATED.
    pub async fn copy_local_to_remote(&self, hash: &ContentHash) -> TierResult<Transfer> {
        let local_path = self.resolve_local_path(hash);
        let source = fs_io::file_digest(&local_path)
            .await?
            .ok_or_else(|| TierError::LocalMissing {
                hash: hash.to_string(),
            })?;

        let limit = self.remote.max_object_size();
        if source.size > limit {
            return Err(TierError::TooLarge {
                hash: hash.to_string(),
                size: source.size,
                limit,
            });
        }

        let stream = fs_io::open_stream(&local_path)
            .await?
            .ok_or_else(|| TierError::LocalMissing {
                hash: hash.to_string(),
            })?;
        let sent = self.remote.put(hash, stream).await?;

        if !same_digest(&sent.md5, &source.md5) {
            // The local file changed while it was being read.
            return Err(TierError::VerificationFailed {
                hash: hash.to_string(),
                expected: source.md5,
                actual: sent.md5,
            });
        }

        if !self.remote.exists_and_verified(hash, &source.md5).await? {
            let actual = match self.remote.head(hash).await {
                Ok(Some(meta)) => meta.md5,
                Ok(None) => "missing".to_string(),
                Err(err) => format!("unknown ({})", err),
            };
            return Err(TierError::VerificationFailed {
                hash: hash.to_string(),
                expected: source.md5,
                actual,
            });
        }

        debug!(contenthash = %hash, bytes = source.size, "copied local object to remote tier");
        Ok(Transfer {
            location: ObjectLocation::Duplicated,
            bytes: source.size,
            md5: source.md5,
        })
    }

    /// Copy the remote object back to the local tier.
    ///
    /// The bytes are staged next to the final path and only renamed into
    /// place once their md5 matches what the remote reports.
    pub async fn copy_remote_to_local(&self, hash: &ContentHash) -> TierResult<Transfer> {
        let expected = self
            .remote
            .head(hash)
            .await?
            .ok_or_else(|| TierError::RemoteMissing {
                hash: hash.to_string(),
            })?;

        let stream = self.remote.get(hash).await?;
        let local_path = self.resolve_local_path(hash);
        let staged = fs_io::stage_stream(&local_path, stream)
            .await
            .map_err(|err| TierError::remote("get", hash, err))?;

        if !same_digest(&staged.written.md5, &expected.md5) {
            let actual = staged.written.md5.clone();
            staged.discard().await;
            return Err(TierError::VerificationFailed {
                hash: hash.to_string(),
                expected: expected.md5,
                actual,
            });
        }

        let written = staged.commit(&local_path).await?;
        debug!(contenthash = %hash, bytes = written.size, "copied remote object to local tier");
        Ok(Transfer {
            location: ObjectLocation::Duplicated,
            bytes: written.size,
            md5: written.md5,
        })
    }

    /// Delete the local copy of an object whose remote copy is verified.
    ///
    /// Refuses unless the registry shows DUPLICATED (or EXTERNAL, which makes
    /// a repeated call a no-op), and re-verifies the remote bytes against the
    /// local md5 before removing anything. Returns the new location.
    pub async fn delete_local(&self, hash: &ContentHash) -> TierResult<ObjectLocation> {
        let record = self.registry.get(hash).await?;
        let location = record.as_ref().map(|r| r.effective_location());
        if !location.is_some_and(ObjectLocation::has_remote) {
            return Err(TierError::NotDuplicated {
                hash: hash.to_string(),
            });
        }

        let local_path = self.resolve_local_path(hash);
        let Some(local) = fs_io::file_digest(&local_path).await? else {
            if location == Some(ObjectLocation::External) {
                return Ok(ObjectLocation::External);
            }
            return Err(TierError::LocalMissing {
                hash: hash.to_string(),
            });
        };

        if !self.remote.exists_and_verified(hash, &local.md5).await? {
            return Err(TierError::VerificationFailed {
                hash: hash.to_string(),
                expected: local.md5,
                actual: "remote copy missing or different".to_string(),
            });
        }

        fs_io::remove_if_exists(&local_path).await?;
        if let Some(parent) = local_path.parent() {
            fs_io::prune_empty_dirs(parent, &self.local_root).await;
        }
        info!(contenthash = %hash, bytes = local.size, "deleted local copy");
        Ok(ObjectLocation::External)
    }

    /// Delete the remote copy. Absent objects are not an error.
    pub async fn delete_remote(&self, hash: &ContentHash) -> TierResult<()> {
        self.remote.delete(hash).await?;
        debug!(contenthash = %hash, "deleted remote copy");
        Ok(())
    }

    /// Probe both tiers directly, bypassing the registry.
    ///
    /// - both present and md5s agree: DUPLICATED
    /// - local present (remote absent or different): LOCAL
    /// - remote only, size matching `expected_size` when known: EXTERNAL
    /// - otherwise: ERROR
    ///
    /// Remote I/O failures propagate; an unreachable backend is not evidence
    /// that the object is missing.
    pub async fn get_actual_location(
        &self,
        hash: &ContentHash,
        expected_size: Option<u64>,
    ) -> TierResult<ObjectLocation> {
        let local = self.local_digest(hash).await?;
        let remote = self.remote.head(hash).await?;

        let location = match (local, remote) {
            (Some(local), Some(remote)) if same_digest(&remote.md5, &local.md5) => {
                ObjectLocation::Duplicated
            }
            (Some(_), _) => ObjectLocation::Local,
            (None, Some(remote)) if expected_size.is_none_or(|size| size == remote.size) => {
                ObjectLocation::External
            }
            (None, _) => ObjectLocation::Error,
        };
        debug!(contenthash = %hash, %location, "probed actual location");
        Ok(location)
    }

    /// Take the per-object lock, waiting at most `wait`.
    ///
    /// `Ok(None)` means the object is busy; the caller skips it this pass.
    /// A zero `wait` makes exactly one attempt.
    pub async fn acquire_object_lock(
        &self,
        hash: &ContentHash,
        wait: Duration,
    ) -> TierResult<Option<ObjectLock>> {
        let key = hash.to_string();
        let owner = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            if self.locks.try_acquire(&key, &owner, self.lock_lease).await? {
                return Ok(Some(ObjectLock::new(self.locks.clone(), key, owner)));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(contenthash = %hash, "object lock busy");
                return Ok(None);
            }
            sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

impl std::fmt::Debug for TieredFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredFileSystem")
            .field("local_root", &self.local_root)
            .field("remote", &self.remote.kind())
            .finish()
    }
}
