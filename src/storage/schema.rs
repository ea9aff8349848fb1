//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Crawlbeat database.
//! Timestamps are stored as RFC 3339 UTC strings with millisecond precision,
//! which keeps them lexicographically ordered.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Durable task queue; completed tasks are deleted
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawler TEXT NOT NULL,
    stage TEXT NOT NULL,
    run_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    available_at TEXT NOT NULL,
    lease_owner TEXT,
    lease_expires_at TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_ready ON tasks(state, available_at);
CREATE INDEX IF NOT EXISTS idx_tasks_crawler ON tasks(crawler, state);
CREATE INDEX IF NOT EXISTS idx_tasks_run ON tasks(crawler, run_id);

-- Per-crawler run bookkeeping
CREATE TABLE IF NOT EXISTS run_states (
    crawler TEXT PRIMARY KEY,
    last_run TEXT,
    current_run TEXT,
    run_count INTEGER NOT NULL DEFAULT 0,
    tasks_completed INTEGER NOT NULL DEFAULT 0,
    tasks_failed INTEGER NOT NULL DEFAULT 0
);

-- Incremental crawl fingerprints
CREATE TABLE IF NOT EXISTS fingerprints (
    crawler TEXT NOT NULL,
    key TEXT NOT NULL,
    seen_at TEXT NOT NULL,
    PRIMARY KEY (crawler, key)
);

-- Cached HTTP responses (successful responses only)
CREATE TABLE IF NOT EXISTS http_cache (
    crawler TEXT NOT NULL,
    signature TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL,
    ttl_secs INTEGER NOT NULL,
    PRIMARY KEY (crawler, signature)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
