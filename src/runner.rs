//! Batch Runner: one scheduled invocation of one manipulator kind.
//!
//! Validates the configuration, runs the matching selector, hands the
//! candidates to the manipulator and reports the totals.

use std::time::Instant;
use tracing::info;

use crate::{
    errors::TierResult,
    logger::ObjectEvent,
    manipulators::{self, ManipulatorContext, ManipulatorKind, ManipulatorReport},
    selectors,
};

pub struct BatchRunner {
    ctx: ManipulatorContext,
}

impl BatchRunner {
    pub fn new(ctx: ManipulatorContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ManipulatorContext {
        &self.ctx
    }

    /// Run `kind` once. Only failures that make the whole batch meaningless
    /// (bad configuration, an unreachable registry) are returned as errors.
    pub async fn run(&self, kind: ManipulatorKind) -> TierResult<ManipulatorReport> {
        self.ctx.config.validate()?;

        let selector = selectors::build(kind, &self.ctx);
        let query_started = Instant::now();
        let candidates = selector.select(self.ctx.clock.now()).await?;
        self.ctx.logger.log(ObjectEvent::QueryExecuted {
            query: selector.name(),
            candidates: candidates.len(),
            bytes: candidates.iter().map(|c| c.bytes()).sum(),
            elapsed: query_started.elapsed(),
        });
        info!(
            task = %kind,
            selector = selector.name(),
            candidates = candidates.len(),
            "selected candidates"
        );

        let manipulator = manipulators::build(kind, self.ctx.clone());
        let report = manipulators::execute(manipulator.as_ref(), &candidates).await;
        self.ctx.logger.flush(kind.as_str());
        Ok(report)
    }
}
