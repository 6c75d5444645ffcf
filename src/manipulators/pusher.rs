//! LOCAL -> DUPLICATED.

use async_trait::async_trait;

use super::{Manipulator, ManipulatorContext, ManipulatorKind, Outcome, commit_move};
use crate::{
    errors::TierResult,
    logger::ObjectEvent,
    models::{Candidate, ObjectLocation},
};

pub struct Pusher {
    ctx: ManipulatorContext,
}

impl Pusher {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Manipulator for Pusher {
    fn kind(&self) -> ManipulatorKind {
        ManipulatorKind::Pusher
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
        if record.effective_location() != ObjectLocation::Local {
            return Ok(Outcome::Unchanged {
                reason: "no longer local",
            });
        }

        let transfer = self.ctx.fs.copy_local_to_remote(hash).await?;
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
