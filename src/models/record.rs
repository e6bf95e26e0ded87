//! Idempotency bookkeeping types and destination naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies exactly one version of one stored object.
///
/// The generation is a store-assigned version stamp that changes on every
/// overwrite, so a re-upload of the same object name yields a distinct key
/// and therefore a fresh processing attempt.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub bucket: String,
    pub object: String,
    /// Canonical string form of the generation scalar; numeric `123` and
    /// string `"123"` collapse to the same key.
    pub generation: String,
}

impl IdempotencyKey {
    pub fn new(
        bucket: impl Into<String>,
        object: impl Into<String>,
        generation: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            generation: generation.into(),
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.bucket, self.object, self.generation)
    }
}

/// One entry in the [`IdempotencyLedger`](crate::services::ledger::IdempotencyLedger).
///
/// Created as `Processing` the instant a key is claimed; moves exactly once
/// to `Completed` or `Failed` and never leaves a terminal state. Later
/// notifications for the same key are answered from this record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IdempotencyRecord {
    Processing,
    Completed {
        destination: String,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

impl IdempotencyRecord {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IdempotencyRecord::Processing)
    }
}

/// Where a thumbnail lands relative to the bucket root.
///
/// Both templates are driven by the same hour-granularity run timestamp;
/// which one applies is configuration, not code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationLayout {
    /// `<timestamp>/<basename>`
    Root,
    /// `<timestamp>/resized/<basename>`
    Resized,
}

impl DestinationLayout {
    pub fn object_name(&self, timestamp: &str, basename: &str) -> String {
        match self {
            DestinationLayout::Root => format!("{timestamp}/{basename}"),
            DestinationLayout::Resized => format!("{timestamp}/resized/{basename}"),
        }
    }
}

impl std::str::FromStr for DestinationLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(DestinationLayout::Root),
            "resized" => Ok(DestinationLayout::Resized),
            other => Err(format!("unknown destination layout `{other}`")),
        }
    }
}

/// Render the destination folder for a run: `YYYYMMDDTHHZ`, UTC, hour
/// granularity. Batch mode computes this once per run; event mode once per
/// notification.
pub fn timestamp_folder(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%HZ").to_string()
}

/// Final path segment of an object name (`photos/2025/cat.jpg` -> `cat.jpg`).
pub fn basename(object: &str) -> &str {
    object.rsplit('/').next().unwrap_or(object)
}
