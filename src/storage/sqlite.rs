//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{RunState, TaskState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{CacheRecord, LeaseGuard, NewTask, TaskRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const TASK_COLUMNS: &str = "id, crawler, stage, run_id, payload, depth, retry_count, state, \
     available_at, lease_owner, lease_expires_at, last_error, created_at";

/// Splits a guard into the `(owner, expired_before)` query parameters
fn guard_params(guard: LeaseGuard<'_>) -> (Option<&str>, Option<String>) {
    match guard {
        LeaseGuard::Owner(worker) => (Some(worker), None),
        LeaseGuard::ExpiredBefore(now) => (None, Some(db_time(now))),
    }
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // WAL lets `beat` and several `process` workers share the file
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp(value.to_string()))
}

fn parse_optional_time(value: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

/// Raw task columns, converted outside the rusqlite row closure
struct TaskRow {
    id: i64,
    crawler: String,
    stage: String,
    run_id: String,
    payload: String,
    depth: u32,
    retry_count: u32,
    state: String,
    available_at: String,
    lease_owner: Option<String>,
    lease_expires_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            crawler: row.get(1)?,
            stage: row.get(2)?,
            run_id: row.get(3)?,
            payload: row.get(4)?,
            depth: row.get(5)?,
            retry_count: row.get(6)?,
            state: row.get(7)?,
            available_at: row.get(8)?,
            lease_owner: row.get(9)?,
            lease_expires_at: row.get(10)?,
            last_error: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_record(self) -> StorageResult<TaskRecord> {
        let state = TaskState::from_db_string(&self.state).ok_or_else(|| {
            StorageError::Database(format!("unknown task state '{}'", self.state))
        })?;

        Ok(TaskRecord {
            id: self.id,
            crawler: self.crawler,
            stage: self.stage,
            run_id: self.run_id,
            payload: serde_json::from_str(&self.payload)?,
            depth: self.depth,
            retry_count: self.retry_count,
            state,
            available_at: parse_time(&self.available_at)?,
            lease_owner: self.lease_owner,
            lease_expires_at: parse_optional_time(self.lease_expires_at)?,
            last_error: self.last_error,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

fn insert_task_with(conn: &Connection, task: &NewTask, now: DateTime<Utc>) -> StorageResult<i64> {
    let payload = serde_json::to_string(&task.payload)?;
    let now = db_time(now);
    conn.execute(
        "INSERT INTO tasks (crawler, stage, run_id, payload, depth, retry_count, state, available_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
        params![
            task.crawler,
            task.stage,
            task.run_id,
            payload,
            task.depth,
            TaskState::Queued.to_db_string(),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Storage for SqliteStorage {
    // ===== Task Queue =====

    fn insert_task(&mut self, task: &NewTask, now: DateTime<Utc>) -> StorageResult<i64> {
        insert_task_with(&self.conn, task, now)
    }

    fn lease_task(
        &mut self,
        worker: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Option<TaskRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                &format!(
                    "SELECT {} FROM tasks WHERE state = ?1 AND available_at <= ?2 ORDER BY id ASC LIMIT 1",
                    TASK_COLUMNS
                ),
                params![TaskState::Queued.to_db_string(), db_time(now)],
                TaskRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE tasks SET state = ?1, lease_owner = ?2, lease_expires_at = ?3 WHERE id = ?4",
            params![
                TaskState::Running.to_db_string(),
                worker,
                db_time(lease_until),
                row.id
            ],
        )?;
        tx.commit()?;

        let mut record = row.into_record()?;
        record.state = TaskState::Running;
        record.lease_owner = Some(worker.to_string());
        record.lease_expires_at = Some(lease_until);
        Ok(Some(record))
    }

    fn complete_task(
        &mut self,
        task_id: i64,
        worker: &str,
        successors: &[NewTask],
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let crawler: Option<String> = tx
            .query_row(
                "SELECT crawler FROM tasks WHERE id = ?1 AND state = ?2 AND lease_owner = ?3",
                params![task_id, TaskState::Running.to_db_string(), worker],
                |row| row.get(0),
            )
            .optional()?;

        let Some(crawler) = crawler else {
            tx.commit()?;
            return Ok(false);
        };

        tx.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;

        for successor in successors {
            insert_task_with(&tx, successor, now)?;
        }

        tx.execute(
            "INSERT INTO run_states (crawler, tasks_completed) VALUES (?1, 1)
             ON CONFLICT(crawler) DO UPDATE SET tasks_completed = tasks_completed + 1",
            params![crawler],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn reschedule_task(
        &mut self,
        task_id: i64,
        guard: LeaseGuard<'_>,
        retry_count: u32,
        available_at: DateTime<Utc>,
        error: &str,
    ) -> StorageResult<bool> {
        let (owner, expired_before) = guard_params(guard);
        let changed = self.conn.execute(
            "UPDATE tasks SET state = ?1, retry_count = ?2, available_at = ?3, last_error = ?4,
             lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ?5 AND state = ?6 AND (?7 IS NULL OR lease_owner = ?7)
               AND (?8 IS NULL OR lease_expires_at < ?8)",
            params![
                TaskState::Queued.to_db_string(),
                retry_count,
                db_time(available_at),
                error,
                task_id,
                TaskState::Running.to_db_string(),
                owner,
                expired_before
            ],
        )?;
        Ok(changed > 0)
    }

    fn fail_task(
        &mut self,
        task_id: i64,
        guard: LeaseGuard<'_>,
        retry_count: u32,
        error: &str,
    ) -> StorageResult<bool> {
        let (owner, expired_before) = guard_params(guard);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let crawler: Option<String> = tx
            .query_row(
                "SELECT crawler FROM tasks WHERE id = ?1 AND state = ?2
                 AND (?3 IS NULL OR lease_owner = ?3) AND (?4 IS NULL OR lease_expires_at < ?4)",
                params![task_id, TaskState::Running.to_db_string(), owner, expired_before],
                |row| row.get(0),
            )
            .optional()?;

        let Some(crawler) = crawler else {
            tx.commit()?;
            return Ok(false);
        };

        tx.execute(
            "UPDATE tasks SET state = ?1, retry_count = ?2, last_error = ?3,
             lease_owner = NULL, lease_expires_at = NULL WHERE id = ?4",
            params![TaskState::Failed.to_db_string(), retry_count, error, task_id],
        )?;

        tx.execute(
            "INSERT INTO run_states (crawler, tasks_failed) VALUES (?1, 1)
             ON CONFLICT(crawler) DO UPDATE SET tasks_failed = tasks_failed + 1",
            params![crawler],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn get_task(&self, task_id: i64) -> StorageResult<Option<TaskRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                TaskRow::from_row,
            )
            .optional()?;

        row.map(TaskRow::into_record).transpose()
    }

    fn expired_leases(
        &self,
        crawler: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tasks
             WHERE state = ?1 AND lease_expires_at < ?2 AND (?3 IS NULL OR crawler = ?3)
             ORDER BY id ASC",
            TASK_COLUMNS
        ))?;

        let rows = stmt
            .query_map(
                params![TaskState::Running.to_db_string(), db_time(now), crawler],
                TaskRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(TaskRow::into_record).collect()
    }

    fn count_pending(&self, crawler: &str, run_id: Option<&str>) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE crawler = ?1 AND state IN (?2, ?3) AND (?4 IS NULL OR run_id = ?4)",
            params![
                crawler,
                TaskState::Queued.to_db_string(),
                TaskState::Running.to_db_string(),
                run_id
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn tasks_by_state(&self, crawler: &str, state: TaskState) -> StorageResult<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE crawler = ?1 AND state = ?2 ORDER BY id ASC",
            TASK_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![crawler, state.to_db_string()], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(TaskRow::into_record).collect()
    }

    fn delete_tasks(&mut self, crawler: &str) -> StorageResult<u64> {
        let deleted = self
            .conn
            .execute("DELETE FROM tasks WHERE crawler = ?1", params![crawler])?;
        Ok(deleted as u64)
    }

    fn count_tasks_by_state(&self) -> StorageResult<HashMap<TaskState, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM tasks GROUP BY state")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            let state: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((state, count))
        })?;

        for row in rows {
            let (state, count) = row?;
            if let Some(state) = TaskState::from_db_string(&state) {
                counts.insert(state, count as u64);
            }
        }

        Ok(counts)
    }

    // ===== Run State =====

    fn get_run_state(&self, crawler: &str) -> StorageResult<RunState> {
        let row = self
            .conn
            .query_row(
                "SELECT last_run, current_run, run_count, tasks_completed, tasks_failed
                 FROM run_states WHERE crawler = ?1",
                params![crawler],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((last_run, current_run, run_count, completed, failed)) = row else {
            return Ok(RunState::default());
        };

        Ok(RunState {
            last_run: parse_optional_time(last_run)?,
            current_run,
            run_count: run_count as u64,
            tasks_completed: completed as u64,
            tasks_failed: failed as u64,
        })
    }

    fn start_run(
        &mut self,
        crawler: &str,
        run_id: &str,
        entry: &NewTask,
        now: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO run_states (crawler, last_run, current_run, run_count) VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(crawler) DO UPDATE SET
                last_run = excluded.last_run,
                current_run = excluded.current_run,
                run_count = run_count + 1",
            params![crawler, db_time(now), run_id],
        )?;

        let task_id = insert_task_with(&tx, entry, now)?;

        tx.commit()?;
        Ok(task_id)
    }

    fn clear_current_run(&mut self, crawler: &str, run_id: Option<&str>) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE run_states SET current_run = NULL
             WHERE crawler = ?1 AND current_run IS NOT NULL AND (?2 IS NULL OR current_run = ?2)",
            params![crawler, run_id],
        )?;
        Ok(changed > 0)
    }

    fn delete_run_state(&mut self, crawler: &str) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM run_states WHERE crawler = ?1", params![crawler])?;
        Ok(())
    }

    // ===== Fingerprints =====

    fn fingerprint_seen_at(
        &self,
        crawler: &str,
        key: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let seen_at: Option<String> = self
            .conn
            .query_row(
                "SELECT seen_at FROM fingerprints WHERE crawler = ?1 AND key = ?2",
                params![crawler, key],
                |row| row.get(0),
            )
            .optional()?;

        parse_optional_time(seen_at)
    }

    fn upsert_fingerprint(
        &mut self,
        crawler: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO fingerprints (crawler, key, seen_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(crawler, key) DO UPDATE SET seen_at = excluded.seen_at",
            params![crawler, key, db_time(now)],
        )?;
        Ok(())
    }

    fn delete_fingerprints(&mut self, crawler: &str) -> StorageResult<u64> {
        let deleted = self
            .conn
            .execute("DELETE FROM fingerprints WHERE crawler = ?1", params![crawler])?;
        Ok(deleted as u64)
    }

    fn count_fingerprints(&self, crawler: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fingerprints WHERE crawler = ?1",
            params![crawler],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== HTTP Cache =====

    fn get_cache_entry(
        &self,
        crawler: &str,
        signature: &str,
    ) -> StorageResult<Option<CacheRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT url, status, content_type, body, fetched_at, ttl_secs
                 FROM http_cache WHERE crawler = ?1 AND signature = ?2",
                params![crawler, signature],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u16>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((url, status, content_type, body, fetched_at, ttl_secs)) = row else {
            return Ok(None);
        };

        Ok(Some(CacheRecord {
            crawler: crawler.to_string(),
            signature: signature.to_string(),
            url,
            status,
            content_type,
            body,
            fetched_at: parse_time(&fetched_at)?,
            ttl_secs,
        }))
    }

    fn put_cache_entry(&mut self, entry: &CacheRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO http_cache
             (crawler, signature, url, status, content_type, body, fetched_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.crawler,
                entry.signature,
                entry.url,
                entry.status,
                entry.content_type,
                entry.body,
                db_time(entry.fetched_at),
                entry.ttl_secs
            ],
        )?;
        Ok(())
    }

    fn delete_cache_entries(&mut self, crawler: &str) -> StorageResult<u64> {
        let deleted = self
            .conn
            .execute("DELETE FROM http_cache WHERE crawler = ?1", params![crawler])?;
        Ok(deleted as u64)
    }

    fn count_cache_entries(&self, crawler: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM http_cache WHERE crawler = ?1",
            params![crawler],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
