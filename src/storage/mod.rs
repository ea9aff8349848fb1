//! Storage module for persisting orchestration state
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - The durable task queue
//! - Per-crawler run state
//! - Incremental crawl fingerprints
//! - Cached HTTP responses
//!
//! One database file may be shared by several processes (a `beat` loop and
//! any number of `process` workers).

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::TaskState;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared by all components of one process
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens (or creates) the database and wraps it for sharing
pub fn open_storage(path: &Path) -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Opens a private in-memory database
pub fn open_in_memory() -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new_in_memory()?)))
}

/// Locks the shared storage, mapping a poisoned lock to an error
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::LockPoisoned)
}

/// Claim a running task must still be under for a state change to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseGuard<'a> {
    /// The lease belongs to this worker
    Owner(&'a str),

    /// The lease expired before this instant (reclaiming)
    ExpiredBefore(DateTime<Utc>),
}

/// A task to be added to the queue
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub crawler: String,
    pub stage: String,
    pub run_id: String,
    pub payload: Value,
    /// Stage hops from the entry stage
    pub depth: u32,
}

/// Represents a task in the database
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: i64,
    pub crawler: String,
    pub stage: String,
    pub run_id: String,
    pub payload: Value,
    pub depth: u32,
    pub retry_count: u32,
    pub state: TaskState,
    pub available_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Represents a cached HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub crawler: String,
    pub signature: String,
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl CacheRecord {
    /// Returns true while the entry is younger than its TTL
    ///
    /// A TTL reaching past the representable range never expires.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        chrono::Duration::try_seconds(self.ttl_secs)
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .map_or(true, |expires_at| now < expires_at)
    }
}
