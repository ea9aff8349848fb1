//! Worker loop executing pipeline stages
//!
//! Each worker leases one task at a time, runs the stage handler, routes the
//! emissions into successor tasks and completes the task. Handler failures,
//! panics included, stay local to the task (retry, then failed); queue
//! failures stop the whole runner.

use crate::context::Services;
use crate::crawler::CrawlerRegistry;
use crate::pipeline::{Emission, HandlerRegistry, StageContext};
use crate::queue::FailOutcome;
use crate::storage::{NewTask, TaskRecord};
use crate::{CrawlbeatError, Result, StageConfig};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// What happened to one executed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Done; `successors` tasks were enqueued
    Completed { successors: usize },

    /// Failed and requeued
    Retried { retry_count: u32 },

    /// Failed for good
    Failed,

    /// Flushed or reclaimed while running; the result was discarded
    Lost,
}

#[derive(Clone)]
pub struct TaskRunner {
    registry: Arc<CrawlerRegistry>,
    handlers: Arc<HandlerRegistry>,
    services: Services,
}

impl TaskRunner {
    pub fn new(
        registry: Arc<CrawlerRegistry>,
        handlers: Arc<HandlerRegistry>,
        services: Services,
    ) -> Self {
        Self {
            registry,
            handlers,
            services,
        }
    }

    /// Lease owner name of worker `n` of this process
    pub fn worker_id(n: usize) -> String {
        format!("{}-{}", std::process::id(), n)
    }

    /// Runs `workers` concurrent workers until `shutdown` is set
    ///
    /// In-flight tasks are finished before a worker stops. A panicking handler
    /// only fails its own task. If any worker hits a queue failure the others
    /// are aborted and the error is returned.
    pub async fn run(self: Arc<Self>, workers: usize, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut joins = JoinSet::new();

        for n in 0..workers {
            let runner = Arc::clone(&self);
            let mut rx = shutdown.clone();
            joins.spawn(async move {
                let worker = Self::worker_id(n);
                runner.worker_loop(&worker, &mut rx).await
            });
        }

        tracing::info!(workers, "Task runner started");

        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Worker stopped on queue failure: {}", e);
                    joins.abort_all();
                    return Err(e);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!("Worker panicked: {}", e);
                    joins.abort_all();
                    return Err(CrawlbeatError::Worker(e.to_string()));
                }
            }
        }

        tracing::info!("Task runner stopped");
        Ok(())
    }

    async fn worker_loop(&self, worker: &str, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        tracing::debug!(worker, "Worker started");

        while let Some(task) = self.services.queue.next(worker, shutdown).await? {
            self.execute_isolated(worker, task).await?;
        }

        tracing::debug!(worker, "Worker stopped");
        Ok(())
    }

    /// Leases and executes one task, if any is available
    pub async fn process_one(&self, worker: &str) -> Result<Option<TaskOutcome>> {
        match self.services.queue.lease(worker)? {
            Some(task) => self.execute_isolated(worker, task).await.map(Some),
            None => Ok(None),
        }
    }

    /// Executes tasks until none is available
    ///
    /// Tasks delayed for a retry are not waited for.
    ///
    /// # Returns
    ///
    /// The number of tasks executed
    pub async fn drain(&self, worker: &str) -> Result<usize> {
        let mut executed = 0;
        while self.process_one(worker).await?.is_some() {
            executed += 1;
        }
        Ok(executed)
    }

    /// Runs `execute` in its own tokio task so a panicking handler fails
    /// only the task it was given
    async fn execute_isolated(&self, worker: &str, task: TaskRecord) -> Result<TaskOutcome> {
        let runner = self.clone();
        let owner = worker.to_string();
        let leased = task.clone();

        match tokio::spawn(async move { runner.execute(&owner, leased).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let error = format!("stage handler panicked: {}", panic_message(e.into_panic()));
                self.record_failure(worker, &task, error)
            }
            // Runtime shutdown; the lease expires and the task is redelivered
            Err(_) => Ok(TaskOutcome::Lost),
        }
    }

    async fn execute(&self, worker: &str, task: TaskRecord) -> Result<TaskOutcome> {
        let queue = &self.services.queue;

        let Some(crawler) = self.registry.find(&task.crawler) else {
            return self.reject(worker, &task, format!("unknown crawler '{}'", task.crawler));
        };
        let definition = crawler.definition();

        let Some(stage) = definition.stage(&task.stage) else {
            return self.reject(worker, &task, format!("unknown stage '{}'", task.stage));
        };

        let Some(handler) = self.handlers.get(&stage.method) else {
            return self.reject(worker, &task, format!("no handler for method '{}'", stage.method));
        };

        let mut ctx = StageContext::new(
            self.services.clone(),
            &task.crawler,
            definition.expire,
            stage,
            &task,
        );

        match handler.execute(&mut ctx).await {
            Ok(emissions) => {
                let successors = self.route(&task, stage, emissions);

                if !queue.complete(&task, worker, &successors)? {
                    return Ok(TaskOutcome::Lost);
                }

                for key in ctx.take_marks() {
                    self.services.incremental.mark_seen_or_warn(&task.crawler, &key);
                }

                tracing::debug!(
                    task_id = task.id,
                    crawler = %task.crawler,
                    stage = %task.stage,
                    successors = successors.len(),
                    "Task completed"
                );

                self.finish_run(&task)?;
                Ok(TaskOutcome::Completed {
                    successors: successors.len(),
                })
            }
            Err(e) => self.record_failure(worker, &task, e.to_string()),
        }
    }

    /// Fails a task through the retry policy
    fn record_failure(&self, worker: &str, task: &TaskRecord, error: String) -> Result<TaskOutcome> {
        match self.services.queue.fail(task, worker, &error)? {
            FailOutcome::Retry {
                retry_count,
                available_at,
            } => {
                tracing::warn!(
                    task_id = task.id,
                    crawler = %task.crawler,
                    stage = %task.stage,
                    retry_count,
                    %available_at,
                    "Task failed, will retry: {}",
                    error
                );
                Ok(TaskOutcome::Retried { retry_count })
            }
            FailOutcome::Failed { retry_count } => {
                tracing::error!(
                    task_id = task.id,
                    crawler = %task.crawler,
                    stage = %task.stage,
                    retry_count,
                    "Task failed permanently: {}",
                    error
                );
                self.finish_run(task)?;
                Ok(TaskOutcome::Failed)
            }
            FailOutcome::Lost => Ok(TaskOutcome::Lost),
        }
    }

    /// Records a task that can never run as failed
    fn reject(&self, worker: &str, task: &TaskRecord, error: String) -> Result<TaskOutcome> {
        tracing::error!(task_id = task.id, crawler = %task.crawler, "Cannot execute task: {}", error);

        if self.services.queue.fail_permanently(task, worker, &error)? {
            self.finish_run(task)?;
            Ok(TaskOutcome::Failed)
        } else {
            Ok(TaskOutcome::Lost)
        }
    }

    fn finish_run(&self, task: &TaskRecord) -> Result<()> {
        if self
            .services
            .queue
            .finish_run_if_idle(&task.crawler, &task.run_id)?
        {
            tracing::info!(crawler = %task.crawler, run_id = %task.run_id, "Run finished");
        }
        Ok(())
    }

    /// Turns emissions into successor tasks through the stage's routes
    ///
    /// Emissions beyond `max_fanout` are dropped, as are all successors
    /// deeper than `max_depth`.
    fn route(&self, task: &TaskRecord, stage: &StageConfig, mut emissions: Vec<Emission>) -> Vec<NewTask> {
        let settings = &self.services.settings;

        if emissions.len() > settings.max_fanout {
            tracing::warn!(
                task_id = task.id,
                crawler = %task.crawler,
                stage = %stage.name,
                emitted = emissions.len(),
                max_fanout = settings.max_fanout,
                "Too many emissions, truncating"
            );
            emissions.truncate(settings.max_fanout);
        }

        let depth = task.depth.saturating_add(1);
        let successors: Vec<NewTask> = emissions
            .into_iter()
            .filter_map(|emission| {
                let target = stage.handle.get(&emission.rule)?;
                Some(NewTask {
                    crawler: task.crawler.clone(),
                    stage: target.clone(),
                    run_id: task.run_id.clone(),
                    payload: emission.payload,
                    depth,
                })
            })
            .collect();

        if depth > settings.max_depth && !successors.is_empty() {
            tracing::warn!(
                task_id = task.id,
                crawler = %task.crawler,
                stage = %stage.name,
                depth,
                max_depth = settings.max_depth,
                "Pipeline depth limit reached, dropping {} successors",
                successors.len()
            );
            return Vec::new();
        }

        successors
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
