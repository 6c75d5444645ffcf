//! Selectors for the bookkeeping manipulators: checker, recoverer, orphaner
//! and orphan cleanup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::{collections::HashMap, sync::Arc};

use super::{CandidateSelector, cutoff};
use crate::{
    config::TieringConfig,
    errors::TierResult,
    models::{Candidate, ContentHash, ObjectLocation, ObjectRecord},
    services::{MetadataCatalog, ObjectRegistry, TimeWindow},
};

/// Catalog rows fetched per round trip while the checker scans.
const CHECKER_PAGE_SIZE: u32 = 1000;

/// Catalog hashes the registry doesn't know well enough: no record at all, a
/// record without a size, or an ORPHANED record that is referenced again.
pub struct CheckerSelector {
    registry: ObjectRegistry,
    catalog: Arc<dyn MetadataCatalog>,
    config: TieringConfig,
}

impl CheckerSelector {
    pub fn new(
        registry: ObjectRegistry,
        catalog: Arc<dyn MetadataCatalog>,
        config: TieringConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            config,
        }
    }
}

fn needs_check(record: Option<&ObjectRecord>) -> bool {
    match record {
        None => true,
        Some(record) => {
            record.filesize.is_none() || record.effective_location() == ObjectLocation::Orphaned
        }
    }
}

#[async_trait]
impl CandidateSelector for CheckerSelector {
    fn name(&self) -> &'static str {
        "check"
    }

    async fn select(&self, now: DateTime<Utc>) -> TierResult<Vec<Candidate>> {
        let limit = self.config.batch_size as usize;
        let mut selected = Vec::new();
        let mut after: Option<ContentHash> = None;

        loop {
            let page = self
                .catalog
                .distinct_hashes(TimeWindow::until(now), after.as_ref(), CHECKER_PAGE_SIZE)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.contenthash.clone());
            let exhausted = page.len() < CHECKER_PAGE_SIZE as usize;

            let hashes: Vec<ContentHash> = page.iter().map(|e| e.contenthash.clone()).collect();
            let records: HashMap<ContentHash, ObjectRecord> = self
                .registry
                .get_many(&hashes)
                .await?
                .into_iter()
                .map(|record| (record.contenthash.clone(), record))
                .collect();

            for entry in page {
                if needs_check(records.get(&entry.contenthash)) {
                    selected.push(Candidate::new(entry.contenthash, entry.filesize));
                    if selected.len() >= limit {
                        return Ok(selected);
                    }
                }
            }
            if exhausted {
                break;
            }
        }
        Ok(selected)
    }
}

/// Records in ERROR.
pub struct RecoverSelector {
    db: Arc<SqlitePool>,
    config: TieringConfig,
}

impl RecoverSelector {
    pub fn new(db: Arc<SqlitePool>, config: TieringConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl CandidateSelector for RecoverSelector {
    fn name(&self) -> &'static str {
        "recover"
    }

    async fn select(&self, _now: DateTime<Utc>) -> TierResult<Vec<Candidate>> {
        let candidates = sqlx::query_as::<_, Candidate>(
            "SELECT contenthash, COALESCE(filesize, 0) AS filesize FROM objects
             WHERE location = ?
             ORDER BY contenthash ASC LIMIT ?",
        )
        .bind(ObjectLocation::Error)
        .bind(i64::from(self.config.batch_size))
        .fetch_all(&*self.db)
        .await?;
        Ok(candidates)
    }
}

/// Records no catalog row references that are not ORPHANED yet.
pub struct OrphanSelector {
    db: Arc<SqlitePool>,
    config: TieringConfig,
}

impl OrphanSelector {
    pub fn new(db: Arc<SqlitePool>, config: TieringConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl CandidateSelector for OrphanSelector {
    fn name(&self) -> &'static str {
        "orphan"
    }

    async fn select(&self, _now: DateTime<Utc>) -> TierResult<Vec<Candidate>> {
        let candidates = sqlx::query_as::<_, Candidate>(
            "SELECT o.contenthash, COALESCE(o.filesize, 0) AS filesize
             FROM objects o
             LEFT JOIN files f ON f.contenthash = o.contenthash
             WHERE f.id IS NULL AND (o.location IS NULL OR o.location != ?)
             ORDER BY o.contenthash ASC LIMIT ?",
        )
        .bind(ObjectLocation::Orphaned)
        .bind(i64::from(self.config.batch_size))
        .fetch_all(&*self.db)
        .await?;
        Ok(candidates)
    }
}

/// ORPHANED records whose grace delay has run out.
pub struct OrphanCleanupSelector {
    db: Arc<SqlitePool>,
    config: TieringConfig,
}

impl OrphanCleanupSelector {
    pub fn new(db: Arc<SqlitePool>, config: TieringConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl CandidateSelector for OrphanCleanupSelector {
    fn name(&self) -> &'static str {
        "orphan-cleanup"
    }

    async fn select(&self, now: DateTime<Utc>) -> TierResult<Vec<Candidate>> {
        let candidates = sqlx::query_as::<_, Candidate>(
            "SELECT contenthash, COALESCE(filesize, 0) AS filesize FROM objects
             WHERE location = ? AND timeorphaned <= ?
             ORDER BY contenthash ASC LIMIT ?",
        )
        .bind(ObjectLocation::Orphaned)
        .bind(cutoff(now, self.config.orphan_grace_delay))
        .bind(i64::from(self.config.batch_size))
        .fetch_all(&*self.db)
        .await?;
        Ok(candidates)
    }
}
