//! Manipulators: the workers that move candidates from one location to the
//! next.
//!
//! Every manipulator shares the same loop ([`execute`]): check the deadline,
//! take the object lock, re-check the record, act through the tiered file
//! system, commit with a compare-and-set, release the lock. A failure on one
//! object is logged and the loop moves on.

use async_trait::async_trait;
use clap::ValueEnum;
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::TieringConfig,
    errors::{TierError, TierResult},
    logger::{EventLogger, ObjectEvent},
    models::{Candidate, ContentHash, ObjectLocation},
    services::{MetadataCatalog, ObjectRegistry, TieredFileSystem},
};

pub mod checker;
pub mod deleter;
pub mod orphaner;
pub mod puller;
pub mod pusher;
pub mod recoverer;

pub use checker::Checker;
pub use deleter::Deleter;
pub use orphaner::{OrphanCleaner, Orphaner};
pub use puller::Puller;
pub use pusher::Pusher;
pub use recoverer::Recoverer;

/// Closed set of manipulator kinds, resolved once at startup.
#[derive(ValueEnum, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ManipulatorKind {
    /// Create and refresh registry records from the metadata catalog.
    Checker,
    /// LOCAL -> DUPLICATED.
    Pusher,
    /// EXTERNAL -> DUPLICATED.
    Puller,
    /// DUPLICATED -> EXTERNAL.
    Deleter,
    /// ERROR -> whatever the tiers say.
    Recoverer,
    /// Unreferenced -> ORPHANED.
    Orphaner,
    /// Remove ORPHANED records past their grace delay.
    OrphanCleaner,
}

impl ManipulatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checker => "checker",
            Self::Pusher => "pusher",
            Self::Puller => "puller",
            Self::Deleter => "deleter",
            Self::Recoverer => "recoverer",
            Self::Orphaner => "orphaner",
            Self::OrphanCleaner => "orphan-cleaner",
        }
    }
}

impl fmt::Display for ManipulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a selector or manipulator needs for one run.
#[derive(Clone)]
pub struct ManipulatorContext {
    pub registry: ObjectRegistry,
    pub fs: Arc<TieredFileSystem>,
    pub catalog: Arc<dyn MetadataCatalog>,
    pub clock: Arc<dyn Clock>,
    pub logger: Arc<dyn EventLogger>,
    /// Snapshot taken when the run starts; never changes mid-run.
    pub config: TieringConfig,
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Location committed in the registry.
    Moved {
        from: Option<ObjectLocation>,
        to: ObjectLocation,
        bytes: u64,
    },
    /// Record metadata refreshed without a location change.
    Refreshed,
    /// Record deleted.
    Removed { from: ObjectLocation },
    /// The candidate no longer qualifies; nothing was touched.
    Unchanged { reason: &'static str },
}

#[async_trait]
pub trait Manipulator: Send + Sync {
    fn kind(&self) -> ManipulatorKind;

    fn context(&self) -> &ManipulatorContext;

    /// Act on one candidate while its object lock is held.
    ///
    /// Implementations re-read the registry record and return
    /// [`Outcome::Unchanged`] when the candidate went stale.
    async fn manipulate(&self, candidate: &Candidate) -> TierResult<Outcome>;
}

/// Build the manipulator for `kind`.
pub fn build(kind: ManipulatorKind, ctx: ManipulatorContext) -> Box<dyn Manipulator> {
    match kind {
        ManipulatorKind::Checker => Box::new(Checker::new(ctx)),
        ManipulatorKind::Pusher => Box::new(Pusher::new(ctx)),
        ManipulatorKind::Puller => Box::new(Puller::new(ctx)),
        ManipulatorKind::Deleter => Box::new(Deleter::new(ctx)),
        ManipulatorKind::Recoverer => Box::new(Recoverer::new(ctx)),
        ManipulatorKind::Orphaner => Box::new(Orphaner::new(ctx)),
        ManipulatorKind::OrphanCleaner => Box::new(OrphanCleaner::new(ctx)),
    }
}

/// Aggregate result of one [`execute`] call.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ManipulatorReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Stale candidates and objects whose lock was busy.
    pub skipped: usize,
    /// Bytes moved between tiers.
    pub bytes: u64,
    pub elapsed: Duration,
    pub deadline_reached: bool,
    /// Candidates never reached because the deadline passed.
    pub remaining: usize,
}

/// Run `manipulator` over `candidates` until done or until the configured
/// `max_task_runtime` has passed.
pub async fn execute(manipulator: &dyn Manipulator, candidates: &[Candidate]) -> ManipulatorReport {
    let deadline = Instant::now() + manipulator.context().config.max_task_runtime;
    execute_until(manipulator, candidates, deadline).await
}

/// [`execute`] with an explicit deadline.
///
/// The deadline is checked before each object, never during one: an object
/// that was started is always finished.
pub async fn execute_until(
    manipulator: &dyn Manipulator,
    candidates: &[Candidate],
    deadline: Instant,
) -> ManipulatorReport {
    let ctx = manipulator.context();
    let kind = manipulator.kind();
    let started = Instant::now();
    let mut report = ManipulatorReport::default();

    for (index, candidate) in candidates.iter().enumerate() {
        if Instant::now() >= deadline {
            report.deadline_reached = true;
            report.remaining = candidates.len() - index;
            warn!(
                task = %kind,
                remaining = report.remaining,
                "deadline reached, leaving the rest for the next run"
            );
            break;
        }
        report.processed += 1;
        let hash = &candidate.contenthash;

        let lock = match ctx.fs.acquire_object_lock(hash, ctx.config.lock_wait).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                report.skipped += 1;
                ctx.logger.log(ObjectEvent::ObjectSkipped {
                    contenthash: hash.clone(),
                    reason: "locked by another worker",
                });
                continue;
            }
            Err(err) => {
                report.failed += 1;
                record_failure(ctx, hash, &err);
                continue;
            }
        };

        let result = manipulator.manipulate(candidate).await;
        if let Err(err) = &result {
            if err.is_structural() {
                if let Err(mark_err) = mark_error(ctx, hash).await {
                    warn!(contenthash = %hash, error = %mark_err, "could not mark object as error");
                }
            }
        }
        lock.release().await;

        match result {
            Ok(Outcome::Moved { from, to, bytes }) => {
                report.succeeded += 1;
                report.bytes += bytes;
                ctx.logger.log(ObjectEvent::ObjectMoved {
                    contenthash: hash.clone(),
                    from,
                    to,
                    bytes,
                });
            }
            Ok(Outcome::Refreshed) => {
                report.succeeded += 1;
                debug!(task = %kind, contenthash = %hash, "record refreshed");
            }
            Ok(Outcome::Removed { from }) => {
                report.succeeded += 1;
                ctx.logger.log(ObjectEvent::ObjectRemoved {
                    contenthash: hash.clone(),
                    from,
                });
            }
            Ok(Outcome::Unchanged { reason }) => {
                report.skipped += 1;
                ctx.logger.log(ObjectEvent::ObjectSkipped {
                    contenthash: hash.clone(),
                    reason,
                });
            }
            Err(err) => {
                report.failed += 1;
                record_failure(ctx, hash, &err);
            }
        }
    }

    report.elapsed = started.elapsed();
    info!(
        task = %kind,
        processed = report.processed,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        bytes = report.bytes,
        elapsed_ms = report.elapsed.as_millis() as u64,
        deadline_reached = report.deadline_reached,
        "manipulator finished"
    );
    report
}

fn record_failure(ctx: &ManipulatorContext, hash: &ContentHash, err: &TierError) {
    ctx.logger.log(ObjectEvent::ObjectFailed {
        contenthash: hash.clone(),
        class: err.class(),
        error: err.to_string(),
    });
}

/// Ground truth is gone: move the record to ERROR from whatever it holds now.
async fn mark_error(ctx: &ManipulatorContext, hash: &ContentHash) -> TierResult<()> {
    let Some(record) = ctx.registry.get(hash).await? else {
        return Ok(());
    };
    let from = record.location;
    if ctx
        .registry
        .compare_and_set_location(hash, from, ObjectLocation::Error, ctx.clock.now())
        .await?
    {
        ctx.logger.log(ObjectEvent::ObjectMoved {
            contenthash: hash.clone(),
            from,
            to: ObjectLocation::Error,
            bytes: 0,
        });
    }
    Ok(())
}

/// Commit `from -> to`. A lost race is reported as [`Outcome::Unchanged`].
pub(crate) async fn commit_move(
    ctx: &ManipulatorContext,
    hash: &ContentHash,
    from: Option<ObjectLocation>,
    to: ObjectLocation,
    bytes: u64,
) -> TierResult<Outcome> {
    if ctx
        .registry
        .compare_and_set_location(hash, from, to, ctx.clock.now())
        .await?
    {
        Ok(Outcome::Moved { from, to, bytes })
    } else {
        Ok(Outcome::Unchanged {
            reason: "location changed concurrently",
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixture for manipulator unit tests.

    use super::*;
    use crate::{
        clock::ManualClock,
        db,
        logger::AggregateLogger,
        remote::MemoryRemote,
        services::{InMemoryLockService, SqliteFileCatalog},
    };
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    pub const START: i64 = 1_700_000_000;

    pub struct Harness {
        pub ctx: ManipulatorContext,
        pub db: Arc<SqlitePool>,
        pub remote: MemoryRemote,
        pub clock: ManualClock,
        pub logger: Arc<AggregateLogger>,
        pub locks: InMemoryLockService,
        _dir: TempDir,
    }

    pub fn hash(n: u16) -> ContentHash {
        ContentHash::parse(&format!("{:040x}", n)).unwrap()
    }

    pub async fn harness(config: TieringConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(db::connect_in_memory().await.unwrap());
        let registry = ObjectRegistry::new(db.clone());
        let remote = MemoryRemote::new();
        let locks = InMemoryLockService::new();
        let fs = TieredFileSystem::new(
            dir.path(),
            Arc::new(remote.clone()),
            Arc::new(locks.clone()),
            registry.clone(),
        )
        .await
        .unwrap();
        let clock = ManualClock::at_unix(START);
        let logger = Arc::new(AggregateLogger::new());
        let ctx = ManipulatorContext {
            registry,
            fs: Arc::new(fs),
            catalog: Arc::new(SqliteFileCatalog::new(db.clone())),
            clock: Arc::new(clock.clone()),
            logger: logger.clone(),
            config,
        };
        Harness {
            ctx,
            db,
            remote,
            clock,
            logger,
            locks,
            _dir: dir,
        }
    }

    impl Harness {
        pub async fn store_local(&self, hash: &ContentHash, data: &'static [u8]) {
            let body = stream::iter(vec![Ok(Bytes::from_static(data))]).boxed();
            self.ctx.fs.store_local(hash, body).await.unwrap();
        }

        pub async fn insert_record(
            &self,
            hash: &ContentHash,
            location: ObjectLocation,
            filesize: i64,
        ) {
            self.ctx
                .registry
                .insert_if_absent(hash, location, Some(filesize), self.clock.now())
                .await
                .unwrap();
        }

        pub async fn insert_file(&self, hash: &ContentHash, filesize: i64) {
            sqlx::query("INSERT INTO files (contenthash, filesize, timecreated) VALUES (?, ?, ?)")
                .bind(hash)
                .bind(filesize)
                .bind(START)
                .execute(&*self.db)
                .await
                .unwrap();
        }

        pub async fn location(&self, hash: &ContentHash) -> Option<ObjectLocation> {
            self.ctx
                .registry
                .get(hash)
                .await
                .unwrap()
                .map(|record| record.effective_location())
        }
    }
}
