//! DUPLICATED -> EXTERNAL: drop the local copy of a verified duplicate.
//!
//! The guards checked by the selector are checked again here, against the
//! clock at the moment of deletion.

use async_trait::async_trait;
use tracing::warn;

use super::{Manipulator, ManipulatorContext, ManipulatorKind, Outcome, commit_move};
use crate::{
    errors::TierResult,
    models::{Candidate, ObjectLocation},
    selectors::{as_sql_size, cutoff},
};

pub struct Deleter {
    ctx: ManipulatorContext,
}

impl Deleter {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Manipulator for Deleter {
    fn kind(&self) -> ManipulatorKind {
        ManipulatorKind::Deleter
    }

    fn context(&self) -> &ManipulatorContext {
        &self.ctx
    }

    async fn manipulate(&self, candidate: &Candidate) -> TierResult<Outcome> {
        let config = &self.ctx.config;
        if !config.delete_local {
            return Ok(Outcome::Unchanged {
                reason: "local deletion disabled",
            });
        }

        let hash = &candidate.contenthash;
        let Some(record) = self.ctx.registry.get(hash).await? else {
            return Ok(Outcome::Unchanged {
                reason: "record disappeared",
            });
        };
        if record.effective_location() != ObjectLocation::Duplicated {
            return Ok(Outcome::Unchanged {
                reason: "no longer duplicated",
            });
        }
        let settled_before = cutoff(self.ctx.clock.now(), config.consistency_delay);
        if !record.timeduplicated.is_some_and(|t| t <= settled_before) {
            return Ok(Outcome::Unchanged {
                reason: "consistency delay not elapsed",
            });
        }
        let size = record.filesize.unwrap_or(candidate.filesize);
        if size <= as_sql_size(config.size_threshold) {
            return Ok(Outcome::Unchanged {
                reason: "at or below size threshold",
            });
        }

        let location = self.ctx.fs.delete_local(hash).await?;
        let outcome = commit_move(&self.ctx, hash, record.location, location, 0).await?;
        if matches!(outcome, Outcome::Unchanged { .. }) {
            warn!(contenthash = %hash, "local copy deleted but the record moved on");
        }
        Ok(outcome)
    }
}
