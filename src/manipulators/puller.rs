//! EXTERNAL -> DUPLICATED for objects small enough to prefer local reads.
//!
//! A pulled object keeps its remote copy; it re-enters DUPLICATED with a
//! fresh `timeduplicated`, never LOCAL.

use async_trait::async_trait;

use super::{Manipulator, ManipulatorContext, ManipulatorKind, Outcome, commit_move};
use crate::{
    errors::TierResult,
    logger::ObjectEvent,
    models::{Candidate, ObjectLocation},
    selectors::as_sql_size,
};

pub struct Puller {
    ctx: ManipulatorContext,
}

impl Puller {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Manipulator for Puller {
    fn kind(&self) -> ManipulatorKind {
        ManipulatorKind::Puller
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
        if record.effective_location() != ObjectLocation::External {
            return Ok(Outcome::Unchanged {
                reason: "no longer external",
            });
        }
        let size = record.filesize.unwrap_or(candidate.filesize);
        if size > as_sql_size(self.ctx.config.size_threshold) {
            return Ok(Outcome::Unchanged {
                reason: "above size threshold",
            });
        }

        let transfer = self.ctx.fs.copy_remote_to_local(hash).await?;
        self.ctx.logger.log(ObjectEvent::ObjectRead {
            contenthash: hash.clone(),
            bytes: transfer.bytes,
        });

        commit_move(
            &self.ctx,
            hash,
            record.location,
            transfer.location,
            transfer.bytes,
        )
        .await
    }
}
