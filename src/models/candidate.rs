//! A single row of a candidate set.

use serde::Serialize;
use sqlx::FromRow;

use super::object::ContentHash;

/// The minimal tuple a selector returns for each eligible object.
///
/// Candidates are a snapshot: by the time a manipulator reaches one, the
/// registry row may have moved on, so every manipulator re-checks the record
/// at the point of use.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub contenthash: ContentHash,

    /// Denormalized size in bytes, as known when the candidate was selected.
    pub filesize: i64,
}

impl Candidate {
    pub fn new(contenthash: ContentHash, filesize: i64) -> Self {
        Self {
            contenthash,
            filesize,
        }
    }

    /// Size as an unsigned byte count; negative sizes never leave the registry
    /// but are clamped just in case.
    pub fn bytes(&self) -> u64 {
        self.filesize.max(0) as u64
    }
}
