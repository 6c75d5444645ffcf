//! Candidate selectors: read-only queries that decide which objects a
//! manipulator should look at in one run.
//!
//! A selector never mutates state and never claims rows. Two calls with no
//! registry change in between return the same set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{
    errors::TierResult,
    manipulators::{ManipulatorContext, ManipulatorKind},
    models::Candidate,
};

pub mod maintenance;
pub mod transfer;

pub use maintenance::{CheckerSelector, OrphanCleanupSelector, OrphanSelector, RecoverSelector};
pub use transfer::{DeleteSelector, PullSelector, PushSelector};

#[async_trait]
pub trait CandidateSelector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// At most `batch_size` candidates, evaluated as of `now`.
    async fn select(&self, now: DateTime<Utc>) -> TierResult<Vec<Candidate>>;
}

/// The selector that feeds manipulator `kind`.
pub fn build(kind: ManipulatorKind, ctx: &ManipulatorContext) -> Box<dyn CandidateSelector> {
    let db = ctx.registry.db.clone();
    let config = ctx.config.clone();
    match kind {
        ManipulatorKind::Checker => Box::new(CheckerSelector::new(
            ctx.registry.clone(),
            ctx.catalog.clone(),
            config,
        )),
        ManipulatorKind::Pusher => Box::new(PushSelector::new(
            db,
            config,
            ctx.fs.remote().max_object_size(),
        )),
        ManipulatorKind::Puller => Box::new(PullSelector::new(db, config)),
        ManipulatorKind::Deleter => Box::new(DeleteSelector::new(db, config)),
        ManipulatorKind::Recoverer => Box::new(RecoverSelector::new(db, config)),
        ManipulatorKind::Orphaner => Box::new(OrphanSelector::new(db, config)),
        ManipulatorKind::OrphanCleaner => Box::new(OrphanCleanupSelector::new(db, config)),
    }
}

/// Unix seconds of `now - age`, clamped so huge ages don't wrap.
pub(crate) fn cutoff(now: DateTime<Utc>, age: Duration) -> i64 {
    let age = i64::try_from(age.as_secs()).unwrap_or(i64::MAX);
    now.timestamp().saturating_sub(age)
}

/// Byte counts bound as SQLite integers.
pub(crate) fn as_sql_size(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
