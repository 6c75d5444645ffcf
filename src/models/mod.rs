//! Core data models for the tiering engine.
//!
//! These entities describe registry rows and the transient candidate tuples
//! handed from selectors to manipulators. They map to database rows via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod candidate;
pub mod object;

pub use candidate::Candidate;
pub use object::{ContentHash, ObjectLocation, ObjectRecord};
