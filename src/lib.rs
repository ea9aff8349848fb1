//! Crawlbeat: a crawl-orchestration engine
//!
//! This crate schedules crawler pipelines, fans their stages out through a
//! durable SQLite-backed task queue, and keeps the incremental-dedup and
//! HTTP-cache state that makes repeated crawls cheap and safe.

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod crawler;
pub mod incremental;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Crawlbeat operations
#[derive(Debug, Error)]
pub enum CrawlbeatError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawler [{0}] not found")]
    CrawlerNotFound(String),

    #[error("Invalid pipeline for crawler {crawler}: {message}")]
    Pipeline { crawler: String, message: String },

    #[error("Duplicate crawler name: {0}")]
    DuplicateCrawler(String),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl CrawlbeatError {
    /// Returns true for failures of shared infrastructure, which must stop
    /// the affected loop instead of being isolated to one crawler or task.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::QueueUnavailable(_) | Self::Worker(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for Crawlbeat operations
pub type Result<T> = std::result::Result<T, CrawlbeatError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{CrawlerDefinition, Settings, StageConfig};
pub use context::{AppContext, Services};
pub use crawler::{Crawler, CrawlerRegistry, Schedule};
pub use state::{DueState, RunState, TaskState};
