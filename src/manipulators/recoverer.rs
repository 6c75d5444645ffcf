//! ERROR -> whatever the tiers currently hold.

use async_trait::async_trait;

use super::{Manipulator, ManipulatorContext, ManipulatorKind, Outcome, commit_move};
use crate::{
    errors::TierResult,
    models::{Candidate, ObjectLocation},
};

pub struct Recoverer {
    ctx: ManipulatorContext,
}

impl Recoverer {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Manipulator for Recoverer {
    fn kind(&self) -> ManipulatorKind {
        ManipulatorKind::Recoverer
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
        if record.effective_location() != ObjectLocation::Error {
            return Ok(Outcome::Unchanged {
                reason: "no longer in error",
            });
        }

        let expected_size = record.filesize.and_then(|size| u64::try_from(size).ok());
        let actual = self.ctx.fs.get_actual_location(hash, expected_size).await?;
        if actual == ObjectLocation::Error {
            return Ok(Outcome::Unchanged {
                reason: "still unrecoverable",
            });
        }
        commit_move(&self.ctx, hash, record.location, actual, 0).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::config::TieringConfig;
    use bytes::Bytes;

    #[tokio::test]
    async fn heals_to_observed_location() {
        let h = harness(TieringConfig::default()).await;
        let local = hash(1);
        h.store_local(&local, b"abc").await;
        h.insert_record(&local, ObjectLocation::Error, 3).await;
        let remote = hash(2);
        h.remote.insert(&remote, Bytes::from_static(b"abc"));
        h.insert_record(&remote, ObjectLocation::Error, 3).await;

        let recoverer = Recoverer::new(h.ctx.clone());
        recoverer.manipulate(&Candidate::new(local.clone(), 3)).await.unwrap();
        recoverer.manipulate(&Candidate::new(remote.clone(), 3)).await.unwrap();

        assert_eq!(h.location(&local).await, Some(ObjectLocation::Local));
        assert_eq!(h.location(&remote).await, Some(ObjectLocation::External));
    }

    #[tokio::test]
    async fn remote_copy_with_wrong_size_stays_in_error() {
        let h = harness(TieringConfig::default()).await;
        let target = hash(3);
        h.remote.insert(&target, Bytes::from_static(b"abcd"));
        h.insert_record(&target, ObjectLocation::Error, 3).await;

        let outcome = Recoverer::new(h.ctx.clone())
            .manipulate(&Candidate::new(target.clone(), 3))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Unchanged { .. }));
        assert_eq!(h.location(&target).await, Some(ObjectLocation::Error));
    }
}
