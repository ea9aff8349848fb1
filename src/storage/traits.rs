//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{RunState, TaskState};
use crate::storage::{CacheRecord, LeaseGuard, NewTask, TaskRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Invalid timestamp in database: {0}")]
    InvalidTimestamp(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every method that depends on the current time takes it as an argument, so
/// callers decide which clock is in effect.
pub trait Storage {
    // ===== Task Queue =====

    /// Appends a task that becomes available at `now`
    ///
    /// # Returns
    ///
    /// The ID of the new task
    fn insert_task(&mut self, task: &NewTask, now: DateTime<Utc>) -> StorageResult<i64>;

    /// Claims the oldest available queued task for `worker`
    ///
    /// The claim happens inside an immediate transaction, so two workers
    /// (even in different processes) never receive the same task.
    fn lease_task(
        &mut self,
        worker: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Option<TaskRecord>>;

    /// Removes a finished task and enqueues its successors atomically
    ///
    /// # Returns
    ///
    /// `false` if the task is no longer leased by `worker` (flushed, or
    /// reclaimed after its lease expired); successors are then dropped.
    fn complete_task(
        &mut self,
        task_id: i64,
        worker: &str,
        successors: &[NewTask],
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Puts a task back in the queue after a failed attempt
    fn reschedule_task(
        &mut self,
        task_id: i64,
        guard: LeaseGuard<'_>,
        retry_count: u32,
        available_at: DateTime<Utc>,
        error: &str,
    ) -> StorageResult<bool>;

    /// Records a task as permanently failed
    fn fail_task(
        &mut self,
        task_id: i64,
        guard: LeaseGuard<'_>,
        retry_count: u32,
        error: &str,
    ) -> StorageResult<bool>;

    /// Gets a task by ID
    fn get_task(&self, task_id: i64) -> StorageResult<Option<TaskRecord>>;

    /// Gets running tasks whose lease expired before `now`
    fn expired_leases(
        &self,
        crawler: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<TaskRecord>>;

    /// Counts queued and running tasks of a crawler, optionally for one run
    fn count_pending(&self, crawler: &str, run_id: Option<&str>) -> StorageResult<u64>;

    /// Gets all tasks of a crawler in a given state, oldest first
    fn tasks_by_state(&self, crawler: &str, state: TaskState) -> StorageResult<Vec<TaskRecord>>;

    /// Deletes every task of a crawler
    fn delete_tasks(&mut self, crawler: &str) -> StorageResult<u64>;

    /// Counts all tasks by state
    fn count_tasks_by_state(&self) -> StorageResult<HashMap<TaskState, u64>>;

    // ===== Run State =====

    /// Gets the run state of a crawler (default if it never ran)
    fn get_run_state(&self, crawler: &str) -> StorageResult<RunState>;

    /// Records a new run and enqueues its entry task atomically
    ///
    /// # Returns
    ///
    /// The ID of the entry task
    fn start_run(
        &mut self,
        crawler: &str,
        run_id: &str,
        entry: &NewTask,
        now: DateTime<Utc>,
    ) -> StorageResult<i64>;

    /// Clears the current run marker
    ///
    /// With `run_id` set, only clears the marker if it still names that run.
    fn clear_current_run(&mut self, crawler: &str, run_id: Option<&str>) -> StorageResult<bool>;

    /// Deletes the run state of a crawler
    fn delete_run_state(&mut self, crawler: &str) -> StorageResult<()>;

    // ===== Fingerprints =====

    /// Gets when a key was last marked as seen
    fn fingerprint_seen_at(&self, crawler: &str, key: &str)
        -> StorageResult<Option<DateTime<Utc>>>;

    /// Marks a key as seen at `now` (insert or refresh)
    fn upsert_fingerprint(&mut self, crawler: &str, key: &str, now: DateTime<Utc>)
        -> StorageResult<()>;

    /// Deletes all fingerprints of a crawler
    fn delete_fingerprints(&mut self, crawler: &str) -> StorageResult<u64>;

    /// Counts fingerprints of a crawler
    fn count_fingerprints(&self, crawler: &str) -> StorageResult<u64>;

    // ===== HTTP Cache =====

    /// Gets a cached response
    fn get_cache_entry(&self, crawler: &str, signature: &str)
        -> StorageResult<Option<CacheRecord>>;

    /// Stores or replaces a cached response
    fn put_cache_entry(&mut self, entry: &CacheRecord) -> StorageResult<()>;

    /// Deletes all cached responses of a crawler
    fn delete_cache_entries(&mut self, crawler: &str) -> StorageResult<u64>;

    /// Counts cached responses of a crawler
    fn count_cache_entries(&self, crawler: &str) -> StorageResult<u64>;
}
