//! Incremental crawl state
//!
//! Remembers which items a crawler already processed so repeated runs can
//! skip them. A key only counts as seen within the crawler's retention
//! window (`expire`, in days). Failures of the store are never fatal: the
//! item is treated as unseen and processed again.

use crate::clock::Clock;
use crate::storage::{lock, SharedStorage, Storage, StorageResult};
use std::sync::Arc;

/// Per-crawler fingerprint store
pub struct IncrementalStore {
    storage: SharedStorage,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl IncrementalStore {
    pub fn new(storage: SharedStorage, clock: Arc<dyn Clock>, enabled: bool) -> Self {
        Self {
            storage,
            clock,
            enabled,
        }
    }

    /// Returns true if incremental mode is on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks whether `key` was marked within the last `expire_days` days
    ///
    /// Always false when incremental mode is off or the store fails.
    pub fn seen(&self, crawler: &str, key: &str, expire_days: u32) -> bool {
        if !self.enabled {
            return false;
        }

        let seen_at = lock(&self.storage).and_then(|s| s.fingerprint_seen_at(crawler, key));

        match seen_at {
            Ok(Some(seen_at)) => {
                // A window older than the representable range covers everything
                chrono::Duration::try_days(i64::from(expire_days))
                    .and_then(|window| self.clock.now().checked_sub_signed(window))
                    .map_or(true, |cutoff| seen_at >= cutoff)
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(crawler, key, "Incremental store lookup failed, treating as unseen: {}", e);
                false
            }
        }
    }

    /// Records `key` as processed now
    pub fn mark_seen(&self, crawler: &str, key: &str) -> StorageResult<()> {
        let now = self.clock.now();
        lock(&self.storage)?.upsert_fingerprint(crawler, key, now)
    }

    /// Like [`mark_seen`](Self::mark_seen) but only logs failures
    pub fn mark_seen_or_warn(&self, crawler: &str, key: &str) {
        if let Err(e) = self.mark_seen(crawler, key) {
            tracing::warn!(crawler, key, "Failed to record incremental fingerprint: {}", e);
        }
    }

    /// Forgets every key of a crawler
    pub fn flush(&self, crawler: &str) -> StorageResult<u64> {
        lock(&self.storage)?.delete_fingerprints(crawler)
    }

    pub fn count(&self, crawler: &str) -> StorageResult<u64> {
        lock(&self.storage)?.count_fingerprints(crawler)
    }
}
