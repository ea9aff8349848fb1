use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide settings, read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    /// Enables debug-level logging
    pub debug: bool,

    /// Enables the HTTP response cache
    pub http_cache: bool,

    /// Enables incremental crawling (skip previously processed items)
    pub incremental: bool,

    /// Time the beat loop waits between scheduling passes
    pub beat_interval: Duration,

    /// Path to the SQLite database shared by all processes
    pub database_path: PathBuf,

    /// Directory (or single file) holding crawler definitions
    pub config_path: PathBuf,

    /// Number of concurrent workers in `process`
    pub workers: usize,

    /// Retries allowed after the first failed attempt of a task
    pub max_retries: u32,

    /// Base delay of the exponential retry backoff
    pub retry_delay: Duration,

    /// How long a leased task may run before it is considered abandoned
    pub lease_timeout: Duration,

    /// Fallback wake-up interval for work enqueued by other processes
    pub poll_interval: Duration,

    /// Lifetime of cached HTTP responses
    pub cache_ttl: Duration,

    /// Maximum number of stage hops from the entry stage
    pub max_depth: u32,

    /// Maximum number of emissions a single task may produce
    pub max_fanout: usize,

    /// User agent sent with every HTTP request
    pub user_agent: String,

    /// Timeout for a single HTTP request
    pub http_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            http_cache: true,
            incremental: true,
            beat_interval: Duration::from_secs(60),
            database_path: PathBuf::from("crawlbeat.db"),
            config_path: PathBuf::from("config"),
            workers: 4,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            lease_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(1000),
            cache_ttl: Duration::from_secs(86_400),
            max_depth: 64,
            max_fanout: 10_000,
            user_agent: format!("crawlbeat/{}", env!("CARGO_PKG_VERSION")),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// A crawler as written in its definition file
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerDefinition {
    /// Unique crawler name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Schedule expression; crawlers without one only run on request
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    /// Days a processed item stays "seen" for incremental crawling
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Name of the first stage; defaults to the first listed stage
    #[serde(default)]
    pub entry: Option<String>,

    /// Ordered pipeline stages
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl CrawlerDefinition {
    /// Returns the name of the stage a run starts with
    pub fn entry_stage(&self) -> Option<&str> {
        self.entry
            .as_deref()
            .or_else(|| self.stages.first().map(|s| s.name.as_str()))
    }

    /// Looks up a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }
}

fn default_expire() -> u32 {
    1
}

/// One pipeline stage
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Stage name, unique within the crawler
    pub name: String,

    /// Handler type tag (e.g. "fetch")
    pub method: String,

    /// Handler parameters
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Successor routing: emission rule -> stage name
    #[serde(default)]
    pub handle: BTreeMap<String, String>,
}
