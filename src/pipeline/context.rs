use crate::cache::{CachedResponse, RequestSignature};
use crate::config::StageConfig;
use crate::context::Services;
use crate::pipeline::StageError;
use crate::storage::TaskRecord;
use serde_json::{Map, Value};

/// What a stage handler may see and touch while executing one task
///
/// Access to the incremental store and the HTTP cache is scoped to the
/// task's crawler. Keys passed to [`mark_seen`](Self::mark_seen) are only
/// recorded once the task completed successfully.
pub struct StageContext {
    services: Services,
    crawler: String,
    expire: u32,
    stage: StageConfig,
    task: TaskRecord,
    marks: Vec<String>,
}

impl StageContext {
    pub fn new(
        services: Services,
        crawler: &str,
        expire: u32,
        stage: &StageConfig,
        task: &TaskRecord,
    ) -> Self {
        Self {
            services,
            crawler: crawler.to_string(),
            expire,
            stage: stage.clone(),
            task: task.clone(),
            marks: Vec::new(),
        }
    }

    pub fn crawler(&self) -> &str {
        &self.crawler
    }

    pub fn stage(&self) -> &StageConfig {
        &self.stage
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.stage.params
    }

    pub fn payload(&self) -> &Value {
        &self.task.payload
    }

    pub fn run_id(&self) -> &str {
        &self.task.run_id
    }

    pub fn depth(&self) -> u32 {
        self.task.depth
    }

    /// Failed attempts so far
    pub fn retry_count(&self) -> u32 {
        self.task.retry_count
    }

    pub fn max_fanout(&self) -> usize {
        self.services.settings.max_fanout
    }

    /// Reads a string field of the payload
    pub fn payload_str(&self, field: &str) -> Result<&str, StageError> {
        self.task
            .payload
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::InvalidPayload(format!("missing string field '{}'", field)))
    }

    /// Returns true if `key` was already processed and may be skipped
    pub fn skip_incremental(&self, key: &str) -> bool {
        let seen = self
            .services
            .incremental
            .seen(&self.crawler, key, self.expire);
        if seen {
            tracing::debug!(crawler = %self.crawler, stage = %self.stage.name, key, "Skipping already processed item");
        }
        seen
    }

    /// Marks `key` as processed once this task completes
    pub fn mark_seen(&mut self, key: impl Into<String>) {
        self.marks.push(key.into());
    }

    pub(crate) fn take_marks(&mut self) -> Vec<String> {
        std::mem::take(&mut self.marks)
    }

    /// Performs a request through the crawler's HTTP cache
    ///
    /// # Returns
    ///
    /// The response and whether it was served from the cache
    pub async fn fetch(
        &self,
        signature: &RequestSignature,
        refresh: bool,
    ) -> Result<(CachedResponse, bool), StageError> {
        let fetcher = &self.services.fetcher;
        let result = self
            .services
            .cache
            .get_or_fetch(&self.crawler, signature, refresh, || fetcher.fetch(signature))
            .await?;
        Ok(result)
    }
}
