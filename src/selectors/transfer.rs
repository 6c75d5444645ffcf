//! Selectors for the three transfer manipulators: push, pull and delete.
//!
//! All three share one size threshold. Push and delete take objects strictly
//! above it, pull takes objects at or below it, so no object is ever eligible
//! for both directions at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;

use super::{CandidateSelector, as_sql_size, cutoff};
use crate::{
    config::TieringConfig,
    errors::TierResult,
    models::{Candidate, ObjectLocation},
};

/// LOCAL (or never classified) objects above the size threshold whose oldest
/// referencing file is at least `minimum_age` old, and that fit the remote
/// backend's size limit.
pub struct PushSelector {
    db: Arc<SqlitePool>,
    config: TieringConfig,
    max_object_size: u64,
}

impl PushSelector {
    pub fn new(db: Arc<SqlitePool>, config: TieringConfig, max_object_size: u64) -> Self {
        Self {
            db,
            config,
            max_object_size,
        }
    }
}

#[async_trait]
impl CandidateSelector for PushSelector {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn select(&self, now: DateTime<Utc>) -> TierResult<Vec<Candidate>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT o.contenthash, o.filesize FROM objects o \
             WHERE (o.location IS NULL OR o.location = ",
        );
        builder.push_bind(ObjectLocation::Local);
        builder.push(") AND o.filesize > ");
        builder.push_bind(as_sql_size(self.config.size_threshold));
        builder.push(" AND o.filesize <= ");
        builder.push_bind(as_sql_size(self.max_object_size));
        builder.push(
            " AND (SELECT MIN(f.timecreated) FROM files f WHERE f.contenthash = o.contenthash) <= ",
        );
        builder.push_bind(cutoff(now, self.config.minimum_age));
        builder.push(" ORDER BY o.contenthash ASC LIMIT ");
        builder.push_bind(i64::from(self.config.batch_size));

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }
}

/// EXTERNAL objects at or below the size threshold.
pub struct PullSelector {
    db: Arc<SqlitePool>,
    config: TieringConfig,
}

impl PullSelector {
    pub fn new(db: Arc<SqlitePool>, config: TieringConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl CandidateSelector for PullSelector {
    fn name(&self) -> &'static str {
        "pull"
    }

    async fn select(&self, _now: DateTime<Utc>) -> TierResult<Vec<Candidate>> {
        let candidates = sqlx::query_as::<_, Candidate>(
            "SELECT contenthash, filesize FROM objects
             WHERE location = ? AND filesize <= ?
             ORDER BY contenthash ASC LIMIT ?",
        )
        .bind(ObjectLocation::External)
        .bind(as_sql_size(self.config.size_threshold))
        .bind(i64::from(self.config.batch_size))
        .fetch_all(&*self.db)
        .await?;
        Ok(candidates)
    }
}

/// DUPLICATED objects above the size threshold that have been duplicated for
/// at least `consistency_delay`. Empty while local deletion is disabled.
pub struct DeleteSelector {
    db: Arc<SqlitePool>,
    config: TieringConfig,
}

impl DeleteSelector {
    pub fn new(db: Arc<SqlitePool>, config: TieringConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl CandidateSelector for DeleteSelector {
    fn name(&self) -> &'static str {
        "delete"
    }

    async fn select(&self, now: DateTime<Utc>) -> TierResult<Vec<Candidate>> {
        if !self.config.delete_local {
            return Ok(Vec::new());
        }
        let candidates = sqlx::query_as::<_, Candidate>(
            "SELECT contenthash, filesize FROM objects
             WHERE location = ? AND filesize > ? AND timeduplicated <= ?
             ORDER BY contenthash ASC LIMIT ?",
        )
        .bind(ObjectLocation::Duplicated)
        .bind(as_sql_size(self.config.size_threshold))
        .bind(cutoff(now, self.config.consistency_delay))
        .bind(i64::from(self.config.batch_size))
        .fetch_all(&*self.db)
        .await?;
        Ok(candidates)
    }
}
