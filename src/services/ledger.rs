//! Process-wide idempotency ledger.
//!
//! One guarded map from [`IdempotencyKey`] to [`IdempotencyRecord`] shared by
//! every request handler in the process. The claim is the only
//! synchronization point in the pipeline: two concurrent notifications for
//! the same key race on a single check-and-set, and exactly one of them wins
//! the right to do the work. The lock covers one map read-or-insert or one
//! overwrite and never wraps I/O.
//!
//! State lives and dies with the process; a restart clears every record.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;

use crate::models::record::{IdempotencyKey, IdempotencyRecord};

/// Result of [`IdempotencyLedger::claim_or_inspect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No record existed; one was created in `Processing` and the caller now
    /// owns completing or failing it.
    Claimed,
    /// A record already exists; the caller must answer from it and never
    /// re-claims the key, whatever its status.
    Existing(IdempotencyRecord),
}

#[derive(Default)]
pub struct IdempotencyLedger {
    entries: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the key if it has never been seen, or return the
    /// existing record unchanged.
    pub fn claim_or_inspect(&self, key: &IdempotencyKey) -> ClaimOutcome {
        let mut entries = self.entries.lock().unwrap();
        match entries.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(IdempotencyRecord::Processing);
                ClaimOutcome::Claimed
            }
            Entry::Occupied(slot) => ClaimOutcome::Existing(slot.get().clone()),
        }
    }

    /// Mark a claimed key as completed. Calling without holding a claim for
    /// the key is a programming error.
    pub fn complete(&self, key: &IdempotencyKey, destination: &str, completed_at: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        let previous = entries.insert(
            key.clone(),
            IdempotencyRecord::Completed {
                destination: destination.to_string(),
                completed_at,
            },
        );
        debug_assert_eq!(previous, Some(IdempotencyRecord::Processing));
    }

    /// Mark a claimed key as failed. A failed key stays failed until a new
    /// generation arrives; there is no automatic retry.
    pub fn fail(&self, key: &IdempotencyKey, error: &str) {
        let mut entries = self.entries.lock().unwrap();
        let previous = entries.insert(
            key.clone(),
            IdempotencyRecord::Failed {
                error: error.to_string(),
            },
        );
        debug_assert_eq!(previous, Some(IdempotencyRecord::Processing));
    }

    /// Current record for a key, if any. Used by tests and diagnostics.
    pub fn inspect(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}
