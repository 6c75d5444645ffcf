//! Orphan handling: marking unreferenced records, then removing them once
//! their grace delay has passed.

use async_trait::async_trait;
use tracing::info;

use super::{Manipulator, ManipulatorContext, ManipulatorKind, Outcome, commit_move};
use crate::{
    errors::TierResult,
    models::{Candidate, ObjectLocation},
    selectors::cutoff,
};

/// Any location -> ORPHANED once no logical file references the hash.
pub struct Orphaner {
    ctx: ManipulatorContext,
}

impl Orphaner {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Manipulator for Orphaner {
    fn kind(&self) -> ManipulatorKind {
        ManipulatorKind::Orphaner
    }

    fn context(&self) -> &ManipulatorContext {
        &self.ctx
    }

    async fn manipulate(&self, candidate: &Candidate) -> TierResult<Outcome> {
        let hash = &candidate.contenthash;
        let Some(record) = self.ctx.registry.get(hash).await? else {
            return Ok(Outcome::Unchanged {
                reason: "record disappeared",
            });
        };
        if record.effective_location() == ObjectLocation::Orphaned {
            return Ok(Outcome::Unchanged {
                reason: "already orphaned",
            });
        }
        if self.ctx.catalog.reference_count(hash).await? > 0 {
            return Ok(Outcome::Unchanged {
                reason: "referenced again",
            });
        }
        commit_move(&self.ctx, hash, record.location, ObjectLocation::Orphaned, 0).await
    }
}

/// Deletes ORPHANED records whose grace delay has elapsed, optionally with
/// their remote copy.
pub struct OrphanCleaner {
    ctx: ManipulatorContext,
}

impl OrphanCleaner {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Manipulator for OrphanCleaner {
    fn kind(&self) -> ManipulatorKind {
        ManipulatorKind::OrphanCleaner
    }

    fn context(&self) -> &ManipulatorContext {
        &self.ctx
    }

    async fn manipulate(&self, candidate: &Candidate) -> TierResult<Outcome> {
        let hash = &candidate.contenthash;
        let Some(record) = self.ctx.registry.get(hash).await? else {
            return Ok(Outcome::Unchanged {
                reason: "record disappeared",
            });
        };
        if record.effective_location() != ObjectLocation::Orphaned {
            return Ok(Outcome::Unchanged {
                reason: "no longer orphaned",
            });
        }
        let expired_before = cutoff(self.ctx.clock.now(), self.ctx.config.orphan_grace_delay);
        if !record.timeorphaned.is_some_and(|t| t <= expired_before) {
            return Ok(Outcome::Unchanged {
                reason: "grace delay not elapsed",
            });
        }
        if self.ctx.catalog.reference_count(hash).await? > 0 {
            return Ok(Outcome::Unchanged {
                reason: "referenced again",
            });
        }

        if self.ctx.config.delete_external {
            self.ctx.fs.delete_remote(hash).await?;
        }
        if !self.ctx.registry.delete_orphaned(hash).await? {
            return Ok(Outcome::Unchanged {
                reason: "location changed concurrently",
            });
        }
        info!(
            contenthash = %hash,
            remote_deleted = self.ctx.config.delete_external,
            "removed orphaned record"
        );
        Ok(Outcome::Removed {
            from: ObjectLocation::Orphaned,
        })
    }
}
