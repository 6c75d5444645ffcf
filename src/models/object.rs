//! Represents a content-addressed object tracked by the registry.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, path::PathBuf, str::FromStr};

use crate::errors::{TierError, TierResult};

/// Length of a hex-encoded content digest (SHA-1).
pub const CONTENT_HASH_LEN: usize = 40;

/// Hex-encoded content digest identifying an object on both tiers.
///
/// Collisions are assumed not to occur, so two logical files with the same
/// hash share one stored object and one registry record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse and normalize a content hash.
    ///
    /// Accepts exactly 40 hex characters; upper-case input is folded to lower
    /// case so the same object never resolves to two paths.
    pub fn parse(raw: &str) -> TierResult<Self> {
        if raw.len() != CONTENT_HASH_LEN || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TierError::InvalidHash(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-level shard identifiers: first two and next two hex characters.
    pub fn shards(&self) -> (&str, &str) {
        (&self.0[0..2], &self.0[2..4])
    }

    /// Sharded relative path `{aa}/{bb}/{hash}`, identical on both tiers.
    pub fn relative_path(&self) -> PathBuf {
        let (shard_a, shard_b) = self.shards();
        let mut path = PathBuf::from(shard_a);
        path.push(shard_b);
        path.push(&self.0);
        path
    }
}

impl FromStr for ContentHash {
    type Err = TierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an object's bytes currently live.
///
/// Stored as an integer column; a NULL location means "never classified" and
/// is treated as [`ObjectLocation::Local`] by selectors.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type,
)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum ObjectLocation {
    /// Neither tier confirms a valid copy. Recoverable.
    Error = -1,
    /// Local tier only.
    Local = 0,
    /// Verified on both tiers.
    Duplicated = 1,
    /// Verified on the remote tier; local copy deleted.
    External = 2,
    /// No logical file references the hash anymore.
    Orphaned = 3,
}

impl ObjectLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Local => "local",
            Self::Duplicated => "duplicated",
            Self::External => "external",
            Self::Orphaned => "orphaned",
        }
    }

    /// True when a verified remote copy is known to exist.
    pub fn has_remote(self) -> bool {
        matches!(self, Self::Duplicated | Self::External)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry row.
///
/// Timestamps are Unix seconds. `timeduplicated` is refreshed every time the
/// object (re)enters DUPLICATED and is never cleared; `timeorphaned` is set
/// on first detection as an orphan.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Primary key.
    pub contenthash: ContentHash,

    /// Current location; NULL until first classified.
    pub location: Option<ObjectLocation>,

    /// Size in bytes; NULL until first measured.
    pub filesize: Option<i64>,

    /// When the object last entered DUPLICATED or EXTERNAL.
    pub timeduplicated: Option<i64>,

    /// When the object was first detected as orphaned.
    pub timeorphaned: Option<i64>,
}

impl ObjectRecord {
    /// Location used for selection and guards: NULL counts as LOCAL.
    pub fn effective_location(&self) -> ObjectLocation {
        self.location.unwrap_or(ObjectLocation::Local)
    }
}
