#![allow(dead_code)]

use bytes::Bytes;
use chrono::Duration as ChronoDuration;
use futures::{StreamExt, TryStreamExt, stream};
use object_tiering::{
    clock::{Clock, ManualClock},
    config::TieringConfig,
    db,
    logger::AggregateLogger,
    manipulators::{ManipulatorContext, ManipulatorKind, ManipulatorReport},
    models::{ContentHash, ObjectLocation, ObjectRecord},
    remote::MemoryRemote,
    runner::BatchRunner,
    services::{InMemoryLockService, ObjectRegistry, SqliteFileCatalog, TieredFileSystem},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

pub const START: i64 = 1_700_000_000;
pub const DAY: i64 = 24 * 3600;

/// A complete in-process deployment: in-memory registry, temp-dir local tier,
/// in-memory remote tier and a clock that only moves when told to.
pub struct World {
    pub db: Arc<SqlitePool>,
    pub registry: ObjectRegistry,
    pub fs: Arc<TieredFileSystem>,
    pub remote: MemoryRemote,
    pub clock: ManualClock,
    pub config: TieringConfig,
    _dir: TempDir,
}

pub fn hash(n: u32) -> ContentHash {
    ContentHash::parse(&format!("{:040x}", n)).unwrap()
}

impl World {
    pub async fn new(config: TieringConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(db::connect_in_memory().await.unwrap());
        let registry = ObjectRegistry::new(db.clone());
        let remote = MemoryRemote::new();
        let fs = TieredFileSystem::new(
            dir.path().join("local"),
            Arc::new(remote.clone()),
            Arc::new(InMemoryLockService::new()),
            registry.clone(),
        )
        .await
        .unwrap();
        Self {
            db,
            registry,
            fs: Arc::new(fs),
            remote,
            clock: ManualClock::at_unix(START),
            config,
            _dir: dir,
        }
    }

    pub fn context(&self) -> ManipulatorContext {
        ManipulatorContext {
            registry: self.registry.clone(),
            fs: self.fs.clone(),
            catalog: Arc::new(SqliteFileCatalog::new(self.db.clone())),
            clock: Arc::new(self.clock.clone()),
            logger: Arc::new(AggregateLogger::new()),
            config: self.config.clone(),
        }
    }

    pub async fn run(&self, kind: ManipulatorKind) -> ManipulatorReport {
        BatchRunner::new(self.context()).run(kind).await.unwrap()
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(ChronoDuration::seconds(secs));
    }

    /// A logical file in the host catalog plus its bytes on the local tier.
    pub async fn add_file(&self, hash: &ContentHash, data: &'static [u8]) {
        self.add_file_row(hash, data.len() as i64).await;
        let body = stream::iter(vec![Ok(Bytes::from_static(data))]).boxed();
        self.fs.store_local(hash, body).await.unwrap();
    }

    pub async fn add_file_row(&self, hash: &ContentHash, filesize: i64) {
        sqlx::query("INSERT INTO files (contenthash, filesize, timecreated) VALUES (?, ?, ?)")
            .bind(hash)
            .bind(filesize)
            .bind(self.clock.now().timestamp())
            .execute(&*self.db)
            .await
            .unwrap();
    }

    pub async fn remove_file_rows(&self, hash: &ContentHash) {
        sqlx::query("DELETE FROM files WHERE contenthash = ?")
            .bind(hash)
            .execute(&*self.db)
            .await
            .unwrap();
    }

    pub async fn record(&self, hash: &ContentHash) -> Option<ObjectRecord> {
        self.registry.get(hash).await.unwrap()
    }

    pub async fn location(&self, hash: &ContentHash) -> Option<ObjectLocation> {
        self.record(hash).await.map(|r| r.effective_location())
    }

    pub fn has_local(&self, hash: &ContentHash) -> bool {
        self.fs.resolve_local_path(hash).is_file()
    }

    pub async fn read(&self, hash: &ContentHash) -> Vec<u8> {
        let chunks: Vec<Bytes> = self
            .fs
            .read_object(hash)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }
}
