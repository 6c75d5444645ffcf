//! Read-only view of the host application's file-metadata catalog.
//!
//! The host owns the `files` table (one row per logical file, many rows may
//! share a content hash). The tiering core only issues aggregate reads
//! against it and never writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;

use crate::{errors::TierResult, models::ContentHash};

/// Aggregated facts about one content hash.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub contenthash: ContentHash,
    /// Largest size any referencing file reports.
    pub filesize: i64,
    /// Creation time (Unix seconds) of the oldest referencing file.
    pub timecreated: i64,
}

/// Inclusive creation-time window `[from, to]`; `None` leaves a side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Everything created at or before `to`.
    pub fn until(to: DateTime<Utc>) -> Self {
        Self { from: None, to: Some(to) }
    }
}

#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Distinct content hashes with nonzero size created inside `window`,
    /// ordered by hash, strictly after `after` when given, at most `limit` rows.
    async fn distinct_hashes(
        &self,
        window: TimeWindow,
        after: Option<&ContentHash>,
        limit: u32,
    ) -> TierResult<Vec<CatalogEntry>>;

    /// Facts for one hash, or `None` if no file references it.
    async fn lookup(&self, hash: &ContentHash) -> TierResult<Option<CatalogEntry>>;

    /// Number of logical files referencing `hash`.
    async fn reference_count(&self, hash: &ContentHash) -> TierResult<u64>;
}

/// Catalog backed by a `files` table in the registry database.
#[derive(Clone)]
pub struct SqliteFileCatalog {
    db: Arc<SqlitePool>,
}

impl SqliteFileCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataCatalog for SqliteFileCatalog {
    async fn distinct_hashes(
        &self,
        window: TimeWindow,
        after: Option<&ContentHash>,
        limit: u32,
    ) -> TierResult<Vec<CatalogEntry>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT contenthash, MAX(filesize) AS filesize, MIN(timecreated) AS timecreated \
             FROM files WHERE filesize > 0",
        );
        if let Some(from) = window.from {
            builder.push(" AND timecreated >= ");
            builder.push_bind(from.timestamp());
        }
        if let Some(to) = window.to {
            builder.push(" AND timecreated <= ");
            builder.push_bind(to.timestamp());
        }
        if let Some(after) = after {
            builder.push(" AND contenthash > ");
            builder.push_bind(after.clone());
        }
        builder.push(" GROUP BY contenthash ORDER BY contenthash ASC LIMIT ");
        builder.push_bind(i64::from(limit));

        let rows = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    async fn lookup(&self, hash: &ContentHash) -> TierResult<Option<CatalogEntry>> {
        let entry = sqlx::query_as::<_, CatalogEntry>(
            "SELECT contenthash, MAX(filesize) AS filesize, MIN(timecreated) AS timecreated
             FROM files WHERE contenthash = ? GROUP BY contenthash",
        )
        .bind(hash)
        .fetch_optional(&*self.db)
        .await?;
        Ok(entry)
    }

    async fn reference_count(&self, hash: &ContentHash) -> TierResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE contenthash = ?")
            .bind(hash)
            .fetch_one(&*self.db)
            .await?;
        Ok(count.max(0) as u64)
    }
}
