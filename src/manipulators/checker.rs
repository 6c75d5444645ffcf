//! Keeps the registry in step with the metadata catalog.
//!
//! New hashes get a record classified by probing both tiers. Records missing
//! a size get one. ORPHANED records that are referenced again are brought
//! back to their observed location.

use async_trait::async_trait;

use super::{Manipulator, ManipulatorContext, ManipulatorKind, Outcome, commit_move};
use crate::{
    errors::TierResult,
    models::{Candidate, ObjectLocation},
};

pub struct Checker {
    ctx: ManipulatorContext,
}

impl Checker {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Manipulator for Checker {
    fn kind(&self) -> ManipulatorKind {
        ManipulatorKind::Checker
    }

    fn context(&self) -> &ManipulatorContext {
        &self.ctx
    }

    async fn manipulate(&self, candidate: &Candidate) -> TierResult<Outcome> {
        let hash = &candidate.contenthash;
        let registry = &self.ctx.registry;

        // The catalog may have moved on since selection.
        let Some(entry) = self.ctx.catalog.lookup(hash).await? else {
            return Ok(Outcome::Unchanged {
                reason: "no longer referenced",
            });
        };
        let filesize = entry.filesize.max(candidate.filesize);
        let expected_size = Some(filesize.max(0) as u64);

        let Some(record) = registry.get(hash).await? else {
            let actual = self.ctx.fs.get_actual_location(hash, expected_size).await?;
            let inserted = registry
                .insert_if_absent(hash, actual, Some(filesize), self.ctx.clock.now())
                .await?;
            return Ok(if inserted {
                Outcome::Moved {
                    from: None,
                    to: actual,
                    bytes: 0,
                }
            } else {
                Outcome::Unchanged {
                    reason: "record created concurrently",
                }
            });
        };

        let refreshed = record.filesize.is_none_or(|size| size < filesize)
            && registry.update_filesize(hash, filesize).await?;

        if record.effective_location() == ObjectLocation::Orphaned {
            let actual = self.ctx.fs.get_actual_location(hash, expected_size).await?;
            return commit_move(&self.ctx, hash, record.location, actual, 0).await;
        }

        Ok(if refreshed {
            Outcome::Refreshed
        } else {
            Outcome::Unchanged {
                reason: "record up to date",
            }
        })
    }
}
