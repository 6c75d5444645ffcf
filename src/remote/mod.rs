//! Remote tier capability interface.
//!
//! The tiered file system only ever talks to a `dyn RemoteClient`; each
//! backend implements the trait and is picked once at startup through
//! [`RemoteKind`].

use async_trait::async_trait;
use bytes::Bytes;
use clap::ValueEnum;
use futures::stream::BoxStream;
use serde::Serialize;
use std::{io, sync::Arc};

use crate::{config::AppConfig, errors::TierResult, models::ContentHash};

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemRemote;
pub use memory::{MemoryRemote, RemoteFaults};

/// A stream of object bytes moving between tiers.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

/// Largest single object most S3-compatible stores accept in one PUT.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// What a backend knows about a stored object.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectMeta {
    pub size: u64,
    /// Lowercase hex md5 of the stored bytes.
    pub md5: String,
}

/// Hex digests compare case-insensitively; backends differ in the case they report.
pub fn same_digest(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    fn kind(&self) -> RemoteKind;

    /// Store the full stream under `hash`, replacing any previous bytes.
    async fn put(&self, hash: &ContentHash, stream: ObjectStream) -> TierResult<RemoteObjectMeta>;

    /// Open the stored bytes. `TierError::RemoteMissing` if absent.
    async fn get(&self, hash: &ContentHash) -> TierResult<ObjectStream>;

    /// Remove the stored bytes. Deleting an absent object succeeds.
    async fn delete(&self, hash: &ContentHash) -> TierResult<()>;

    /// Existence and metadata probe; `None` if absent.
    async fn head(&self, hash: &ContentHash) -> TierResult<Option<RemoteObjectMeta>>;

    /// True when the object exists and its md5 equals `expected_md5`.
    async fn exists_and_verified(&self, hash: &ContentHash, expected_md5: &str) -> TierResult<bool> {
        Ok(self
            .head(hash)
            .await?
            .is_some_and(|meta| same_digest(&meta.md5, expected_md5)))
    }

    fn max_object_size(&self) -> u64;
}

/// Closed set of remote backends.
#[derive(ValueEnum, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// A directory tree, e.g. a mounted network share.
    Filesystem,
    /// Process memory; for tests and dry runs.
    Memory,
}

/// Build the configured backend.
pub async fn build(config: &AppConfig) -> TierResult<Arc<dyn RemoteClient>> {
    let client: Arc<dyn RemoteClient> = match config.remote_kind {
        RemoteKind::Filesystem => Arc::new(FilesystemRemote::new(&config.remote_dir).await?),
        RemoteKind::Memory => Arc::new(MemoryRemote::new()),
    };
    Ok(client)
}
