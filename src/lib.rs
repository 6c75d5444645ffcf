//! Two-tier content-addressed object storage.
//!
//! Objects are identified by content hash and live on a fast local tier, a
//! durable remote tier, or both. Scheduled manipulators move them between
//! tiers according to size and age, recording every location in a
//! registry that is only ever changed with compare-and-set updates.

pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod fs_io;
pub mod handlers;
pub mod logger;
pub mod manipulators;
pub mod models;
pub mod remote;
pub mod routes;
pub mod runner;
pub mod selectors;
pub mod services;

pub use errors::{TierError, TierResult};
