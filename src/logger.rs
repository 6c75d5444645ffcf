//! Structured event sink for selectors and manipulators.
//!
//! The core reports what happened to each object as an [`ObjectEvent`] and
//! leaves formatting to the logger. [`AggregateLogger`] keeps per-run totals
//! and mirrors each event to `tracing`; [`NullLogger`] drops everything.

use serde::Serialize;
use std::{collections::BTreeMap, sync::Mutex, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    errors::ErrorClass,
    models::{ContentHash, ObjectLocation},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    /// A selector ran.
    QueryExecuted {
        query: &'static str,
        candidates: usize,
        bytes: u64,
        elapsed: Duration,
    },
    ObjectRead {
        contenthash: ContentHash,
        bytes: u64,
    },
    /// A location change was committed to the registry.
    ObjectMoved {
        contenthash: ContentHash,
        from: Option<ObjectLocation>,
        to: ObjectLocation,
        bytes: u64,
    },
    /// A registry record was deleted.
    ObjectRemoved {
        contenthash: ContentHash,
        from: ObjectLocation,
    },
    /// Nothing to do for this object in this pass.
    ObjectSkipped {
        contenthash: ContentHash,
        reason: &'static str,
    },
    ObjectFailed {
        contenthash: ContentHash,
        class: ErrorClass,
        error: String,
    },
}

pub trait EventLogger: Send + Sync {
    fn log(&self, event: ObjectEvent);

    /// Called once when a run ends.
    fn flush(&self, _task: &str) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl EventLogger for NullLogger {
    fn log(&self, _event: ObjectEvent) {}
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionTotals {
    pub count: u64,
    pub bytes: u64,
}

/// Totals collected by [`AggregateLogger`].
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub queries: u64,
    pub candidates: u64,
    pub candidate_bytes: u64,
    pub reads: u64,
    pub read_bytes: u64,
    pub moved: u64,
    pub moved_bytes: u64,
    pub removed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Keyed by `"{from}->{to}"`; a never-classified source is `null`.
    pub transitions: BTreeMap<String, TransitionTotals>,
}

impl RunSummary {
    pub fn transition(&self, from: Option<ObjectLocation>, to: ObjectLocation) -> TransitionTotals {
        self.transitions
            .get(&transition_key(from, to))
            .copied()
            .unwrap_or_default()
    }
}

fn transition_key(from: Option<ObjectLocation>, to: ObjectLocation) -> String {
    match from {
        Some(from) => format!("{}->{}", from, to),
        None => format!("null->{}", to),
    }
}

#[derive(Debug, Default)]
pub struct AggregateLogger {
    summary: Mutex<RunSummary>,
}

impl AggregateLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Emit the per-transition breakdown at `info`.
    pub fn emit_summary(&self, task: &str) {
        let summary = self.summary();
        for (transition, totals) in &summary.transitions {
            info!(
                task,
                transition = %transition,
                count = totals.count,
                bytes = totals.bytes,
                "transition totals"
            );
        }
        info!(
            task,
            candidates = summary.candidates,
            moved = summary.moved,
            moved_bytes = summary.moved_bytes,
            removed = summary.removed,
            skipped = summary.skipped,
            failed = summary.failed,
            "event summary"
        );
    }
}

impl EventLogger for AggregateLogger {
    fn log(&self, event: ObjectEvent) {
        let mut summary = self
            .summary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match event {
            ObjectEvent::QueryExecuted {
                query,
                candidates,
                bytes,
                elapsed,
            } => {
                summary.queries += 1;
                summary.candidates += candidates as u64;
                summary.candidate_bytes += bytes;
                debug!(
                    query,
                    candidates,
                    bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "query executed"
                );
            }
            ObjectEvent::ObjectRead { contenthash, bytes } => {
                summary.reads += 1;
                summary.read_bytes += bytes;
                debug!(contenthash = %contenthash, bytes, "object read");
            }
            ObjectEvent::ObjectMoved {
                contenthash,
                from,
                to,
                bytes,
            } => {
                summary.moved += 1;
                summary.moved_bytes += bytes;
                let totals = summary
                    .transitions
                    .entry(transition_key(from, to))
                    .or_default();
                totals.count += 1;
                totals.bytes += bytes;
                debug!(contenthash = %contenthash, from = ?from, to = %to, bytes, "object moved");
            }
            ObjectEvent::ObjectRemoved { contenthash, from } => {
                summary.removed += 1;
                debug!(contenthash = %contenthash, from = %from, "object record removed");
            }
            ObjectEvent::ObjectSkipped {
                contenthash,
                reason,
            } => {
                summary.skipped += 1;
                debug!(contenthash = %contenthash, reason, "object skipped");
            }
            ObjectEvent::ObjectFailed {
                contenthash,
                class,
                error,
            } => {
                summary.failed += 1;
                warn!(contenthash = %contenthash, class = ?class, error = %error, "object failed");
            }
        }
    }

    fn flush(&self, task: &str) {
        self.emit_summary(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ContentHash {
        ContentHash::parse(&"ef".repeat(20)).unwrap()
    }

    #[test]
    fn aggregates_by_transition() {
        let logger = AggregateLogger::new();
        logger.log(ObjectEvent::QueryExecuted {
            query: "push",
            candidates: 2,
            bytes: 300,
            elapsed: Duration::from_millis(3),
        });
        for bytes in [100, 200] {
            logger.log(ObjectEvent::ObjectMoved {
                contenthash: hash(),
                from: Some(ObjectLocation::Local),
                to: ObjectLocation::Duplicated,
                bytes,
            });
        }
        logger.log(ObjectEvent::ObjectMoved {
            contenthash: hash(),
            from: None,
            to: ObjectLocation::Duplicated,
            bytes: 5,
        });
        logger.log(ObjectEvent::ObjectFailed {
            contenthash: hash(),
            class: ErrorClass::Transient,
            error: "reset".into(),
        });

        let summary = logger.summary();
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.moved, 3);
        assert_eq!(summary.moved_bytes, 305);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.transition(Some(ObjectLocation::Local), ObjectLocation::Duplicated),
            TransitionTotals { count: 2, bytes: 300 }
        );
        assert!(summary.transitions.contains_key("null->duplicated"));
    }

    #[test]
    fn null_logger_is_silent() {
        NullLogger.log(ObjectEvent::ObjectSkipped {
            contenthash: hash(),
            reason: "busy",
        });
    }
}
