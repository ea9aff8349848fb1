//! Durable task queue
//!
//! Tasks live in the shared SQLite database, so several `process` workers
//! (in this process or others) can drain the same queue. Delivery is
//! at-least-once: a task whose lease expires is handed out again.

mod retry;
mod runner;

pub use retry::RetryPolicy;
pub use runner::{TaskRunner, TaskOutcome};

use crate::clock::{to_chrono, Clock};
use crate::state::TaskState;
use crate::storage::{
    lock, LeaseGuard, NewTask, SharedStorage, SqliteStorage, Storage, StorageError, TaskRecord,
};
use crate::{CrawlbeatError, Result, Settings};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// What happened to a task reported as failed
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Requeued; runs again at `available_at`
    Retry {
        retry_count: u32,
        available_at: DateTime<Utc>,
    },

    /// Retries exhausted; kept as a failed task
    Failed { retry_count: u32 },

    /// The worker no longer held the task (flushed or reclaimed)
    Lost,
}

/// Result of requeueing abandoned leases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub requeued: u64,
    pub failed: u64,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.failed == 0
    }
}

fn unavailable(err: StorageError) -> CrawlbeatError {
    CrawlbeatError::QueueUnavailable(err.to_string())
}

/// The task queue shared by the scheduler and the workers
pub struct TaskQueue {
    storage: SharedStorage,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    lease_timeout: Duration,
    poll_interval: Duration,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(storage: SharedStorage, clock: Arc<dyn Clock>, settings: &Settings) -> Self {
        Self {
            storage,
            clock,
            retry: RetryPolicy::new(settings.max_retries, settings.retry_delay),
            lease_timeout: settings.lease_timeout,
            poll_interval: settings.poll_interval,
            notify: Notify::new(),
        }
    }

    /// Runs `f` against the locked storage; any storage failure means the
    /// queue itself is unusable
    fn with_storage<T>(
        &self,
        f: impl FnOnce(&mut SqliteStorage) -> std::result::Result<T, StorageError>,
    ) -> Result<T> {
        let mut storage = lock(&self.storage).map_err(unavailable)?;
        f(&mut storage).map_err(unavailable)
    }

    /// Adds a task and wakes waiting workers
    pub fn enqueue(&self, task: &NewTask) -> Result<i64> {
        let now = self.clock.now();
        let id = self.with_storage(|s| s.insert_task(task, now))?;
        tracing::debug!(task_id = id, crawler = %task.crawler, stage = %task.stage, "Enqueued task");
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Records a new run and enqueues its entry task in one transaction
    pub fn start_run(&self, crawler: &str, run_id: &str, entry: &NewTask) -> Result<i64> {
        let now = self.clock.now();
        let id = self.with_storage(|s| s.start_run(crawler, run_id, entry, now))?;
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Claims the oldest available task, if any
    ///
    /// Expired leases are reclaimed first so abandoned work is picked up
    /// without waiting for an explicit cleanup.
    pub fn lease(&self, worker: &str) -> Result<Option<TaskRecord>> {
        self.reclaim_expired(None)?;

        let now = self.clock.now();
        let lease_until = now + to_chrono(self.lease_timeout);
        let task = self.with_storage(|s| s.lease_task(worker, now, lease_until))?;

        if let Some(task) = &task {
            tracing::debug!(
                task_id = task.id,
                worker,
                crawler = %task.crawler,
                stage = %task.stage,
                "Leased task"
            );
        }

        Ok(task)
    }

    /// Waits until a task can be leased
    ///
    /// Wakes on local enqueues and, for work produced by other processes or
    /// delayed retries, every poll interval.
    ///
    /// # Returns
    ///
    /// `None` once `shutdown` is set (or its sender is dropped)
    pub async fn next(
        &self,
        worker: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<TaskRecord>> {
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.lease(worker)? {
                return Ok(Some(task));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Deletes a finished task and enqueues its successors atomically
    ///
    /// Returns false if the task was no longer leased by `worker`; the
    /// successors are dropped in that case.
    pub fn complete(&self, task: &TaskRecord, worker: &str, successors: &[NewTask]) -> Result<bool> {
        let now = self.clock.now();
        let done = self.with_storage(|s| s.complete_task(task.id, worker, successors, now))?;

        if done {
            if !successors.is_empty() {
                self.notify.notify_waiters();
            }
        } else {
            tracing::warn!(
                task_id = task.id,
                worker,
                "Task was flushed or reclaimed before completion, dropping {} successors",
                successors.len()
            );
        }

        Ok(done)
    }

    /// Reports a failed attempt; retries with backoff until the cap
    pub fn fail(&self, task: &TaskRecord, worker: &str, error: &str) -> Result<FailOutcome> {
        self.fail_attempt(task, LeaseGuard::Owner(worker), error)
    }

    /// Records a task as failed without retrying
    pub fn fail_permanently(&self, task: &TaskRecord, worker: &str, error: &str) -> Result<bool> {
        let retry_count = task.retry_count;
        self.with_storage(|s| s.fail_task(task.id, LeaseGuard::Owner(worker), retry_count, error))
    }

    fn fail_attempt(
        &self,
        task: &TaskRecord,
        guard: LeaseGuard<'_>,
        error: &str,
    ) -> Result<FailOutcome> {
        let retry_count = task.retry_count.saturating_add(1);

        if self.retry.should_retry(retry_count) {
            let available_at =
                self.clock.now() + to_chrono(self.retry.next_delay(retry_count));
            let requeued = self.with_storage(|s| {
                s.reschedule_task(task.id, guard, retry_count, available_at, error)
            })?;

            if !requeued {
                return Ok(FailOutcome::Lost);
            }

            self.notify.notify_waiters();
            Ok(FailOutcome::Retry {
                retry_count,
                available_at,
            })
        } else {
            let failed =
                self.with_storage(|s| s.fail_task(task.id, guard, retry_count, error))?;

            if !failed {
                return Ok(FailOutcome::Lost);
            }
            Ok(FailOutcome::Failed { retry_count })
        }
    }

    /// Requeues tasks whose lease expired; each counts as a failed attempt
    pub fn reclaim_expired(&self, crawler: Option<&str>) -> Result<ReclaimReport> {
        let now = self.clock.now();
        let expired = self.with_storage(|s| s.expired_leases(crawler, now))?;

        let mut report = ReclaimReport::default();
        for task in &expired {
            let error = format!(
                "lease held by {} expired",
                task.lease_owner.as_deref().unwrap_or("unknown worker")
            );

            match self.fail_attempt(task, LeaseGuard::ExpiredBefore(now), &error)? {
                FailOutcome::Retry { .. } => report.requeued += 1,
                FailOutcome::Failed { .. } => report.failed += 1,
                FailOutcome::Lost => {}
            }
        }

        if !report.is_empty() {
            tracing::warn!(
                requeued = report.requeued,
                failed = report.failed,
                "Reclaimed expired task leases"
            );
        }

        Ok(report)
    }

    /// Counts queued and running tasks of a crawler
    pub fn pending(&self, crawler: &str) -> Result<u64> {
        self.with_storage(|s| s.count_pending(crawler, None))
    }

    /// Counts queued and running tasks of one run
    pub fn pending_for_run(&self, crawler: &str, run_id: &str) -> Result<u64> {
        self.with_storage(|s| s.count_pending(crawler, Some(run_id)))
    }

    /// Clears the current run marker once the run has no work left
    pub fn finish_run_if_idle(&self, crawler: &str, run_id: &str) -> Result<bool> {
        self.with_storage(|s| {
            if s.count_pending(crawler, Some(run_id))? > 0 {
                return Ok(false);
            }
            s.clear_current_run(crawler, Some(run_id))
        })
    }

    /// Lists tasks whose retries are exhausted
    pub fn failed_tasks(&self, crawler: &str) -> Result<Vec<TaskRecord>> {
        self.with_storage(|s| s.tasks_by_state(crawler, TaskState::Failed))
    }

    /// Deletes every task of a crawler, pending or failed
    pub fn flush(&self, crawler: &str) -> Result<u64> {
        self.with_storage(|s| s.delete_tasks(crawler))
    }

    /// Counts all tasks by state
    pub fn counts(&self) -> Result<HashMap<TaskState, u64>> {
        self.with_storage(|s| s.count_tasks_by_state())
    }

    pub fn get(&self, task_id: i64) -> Result<Option<TaskRecord>> {
        self.with_storage(|s| s.get_task(task_id))
    }
}
