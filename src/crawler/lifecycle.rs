use crate::context::Services;
use crate::crawler::{Schedule, ScheduleError};
use crate::state::{DueState, RunState};
use crate::storage::{lock, NewTask, Storage, TaskRecord};
use crate::{CrawlbeatError, CrawlerDefinition, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use ulid::Ulid;

/// What `cleanup()` repaired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Abandoned tasks put back in the queue
    pub requeued: u64,

    /// Abandoned tasks that ran out of retries
    pub failed: u64,

    /// A leftover run marker was cleared
    pub cleared_run: bool,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.failed == 0 && !self.cleared_run
    }
}

/// What `flush()` deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub tasks: u64,
    pub fingerprints: u64,
    pub cache_entries: u64,
}

/// A crawler: its pipeline definition, schedule and enable flag
pub struct Crawler {
    definition: CrawlerDefinition,
    schedule: Option<std::result::Result<Schedule, ScheduleError>>,
    disabled: AtomicBool,
    services: Services,
}

impl Crawler {
    /// Creates a crawler from a validated definition
    ///
    /// A malformed schedule is logged; such a crawler is never due but can
    /// still be run by hand.
    pub fn new(definition: CrawlerDefinition, services: Services) -> Self {
        let schedule = definition.schedule.as_deref().map(Schedule::parse);

        if let Some(Err(e)) = &schedule {
            tracing::error!(crawler = %definition.name, "Invalid schedule, crawler will never be due: {}", e);
        }

        Self {
            disabled: AtomicBool::new(definition.disabled),
            definition,
            schedule,
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn definition(&self) -> &CrawlerDefinition {
        &self.definition
    }

    /// The schedule expression as written
    pub fn schedule_expr(&self) -> Option<&str> {
        self.definition.schedule.as_deref()
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref().and_then(|s| s.as_ref().ok())
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
            || self.schedule().map_or(false, Schedule::is_disabled)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    pub fn run_state(&self) -> Result<RunState> {
        Ok(lock(&self.services.storage)?.get_run_state(self.name())?)
    }

    /// Reports whether the crawler should run at `now`
    ///
    /// # Rules, in order
    ///
    /// 1. Disabled → `Off`
    /// 2. Malformed or missing schedule → `No`
    /// 3. Tasks still pending (a run is in progress) → `No`
    /// 4. Never run → `Yes`
    /// 5. Otherwise the schedule decides, counting from the last run
    pub fn due_state(&self, now: DateTime<Utc>) -> Result<DueState> {
        if self.is_disabled() {
            return Ok(DueState::Off);
        }

        let Some(schedule) = self.schedule() else {
            return Ok(DueState::No);
        };

        if self.services.queue.pending(self.name())? > 0 {
            return Ok(DueState::No);
        }

        let state = self.run_state()?;
        let due = match state.last_run {
            None => true,
            Some(last_run) => schedule.is_due(last_run, now),
        };

        Ok(if due { DueState::Yes } else { DueState::No })
    }

    pub fn check_due(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.due_state(now)? == DueState::Yes)
    }

    /// Starts a run by enqueueing the entry stage
    ///
    /// Returns the new run identifier without waiting for any work; the
    /// tasks are executed by `process` workers.
    pub fn run(&self) -> Result<String> {
        let entry = self
            .definition
            .entry_stage()
            .ok_or_else(|| CrawlbeatError::Pipeline {
                crawler: self.name().to_string(),
                message: "no entry stage".to_string(),
            })?;

        let run_id = Ulid::new().to_string();
        let task = NewTask {
            crawler: self.name().to_string(),
            stage: entry.to_string(),
            run_id: run_id.clone(),
            payload: Value::Object(Map::new()),
            depth: 0,
        };

        self.services.queue.start_run(self.name(), &run_id, &task)?;
        tracing::info!(crawler = self.name(), run_id = %run_id, stage = entry, "Started run");

        Ok(run_id)
    }

    /// Starts a run with cleanup on both sides
    ///
    /// Leftovers of a crashed run are reclaimed before the new entry task is
    /// enqueued. Used by the scheduler and by manual runs.
    pub fn start(&self) -> Result<String> {
        self.cleanup()?;
        let run_id = self.run()?;
        self.cleanup()?;
        Ok(run_id)
    }

    /// Deletes everything persisted for the crawler to force a full re-crawl
    pub fn flush(&self) -> Result<FlushReport> {
        let tasks = self.services.queue.flush(self.name())?;
        let fingerprints = self.services.incremental.flush(self.name())?;
        let cache_entries = self.services.cache.flush(self.name())?;
        lock(&self.services.storage)?.delete_run_state(self.name())?;

        let report = FlushReport {
            tasks,
            fingerprints,
            cache_entries,
        };
        tracing::info!(
            crawler = self.name(),
            tasks,
            fingerprints,
            cache_entries,
            "Flushed crawler"
        );
        Ok(report)
    }

    /// Repairs what a crashed run left behind
    ///
    /// Requeues tasks whose lease expired and clears the run marker when no
    /// work remains. Dedup and cache history are kept.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let reclaimed = self.services.queue.reclaim_expired(Some(self.name()))?;

        let cleared_run = if self.services.queue.pending(self.name())? == 0 {
            lock(&self.services.storage)?.clear_current_run(self.name(), None)?
        } else {
            false
        };

        let report = CleanupReport {
            requeued: reclaimed.requeued,
            failed: reclaimed.failed,
            cleared_run,
        };
        if !report.is_empty() {
            tracing::info!(crawler = self.name(), ?report, "Cleaned up stale state");
        }
        Ok(report)
    }

    /// Counts queued and running tasks
    pub fn pending(&self) -> Result<u64> {
        self.services.queue.pending(self.name())
    }

    /// Tasks that exhausted their retries
    pub fn failed_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.services.queue.failed_tasks(self.name())
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("name", &self.definition.name)
            .field("schedule", &self.definition.schedule)
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
