//! Pipeline stages
//!
//! A crawler's pipeline is a graph of stages. Each stage names a handler
//! (`method`) and routes the handler's emissions to successor stages through
//! its `handle` table:
//!
//! ```toml
//! [[stages]]
//! name = "fetch"
//! method = "fetch"
//! handle = { pass = "parse" }
//! ```
//!
//! Emissions whose rule has no route end that branch of the pipeline.

mod context;
pub mod handlers;
mod links;

pub use context::StageContext;
pub use links::{extract_page_links, PageLinks};

use crate::cache::SignatureError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Rule name used for a stage's default output
pub const PASS: &str = "pass";

/// Errors raised by stage handlers; the task is retried up to the cap
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Missing parameter '{0}'")]
    MissingParam(String),

    #[error("Invalid parameter '{name}': {message}")]
    InvalidParam { name: String, message: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid request: {0}")]
    Signature(#[from] SignatureError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("{0}")]
    Other(String),
}

/// One output of a stage: a routing rule and the successor payload
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub rule: String,
    pub payload: Value,
}

impl Emission {
    pub fn new(rule: impl Into<String>, payload: Value) -> Self {
        Self {
            rule: rule.into(),
            payload,
        }
    }

    /// An emission on the default `pass` rule
    pub fn pass(payload: Value) -> Self {
        Self::new(PASS, payload)
    }
}

/// A stage implementation, looked up by the stage's `method`
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Executes one task of this stage
    ///
    /// Handlers must tolerate running the same payload twice; delivery is
    /// at-least-once.
    async fn execute(&self, ctx: &mut StageContext) -> Result<Vec<Emission>, StageError>;

    /// Checks a stage's parameters when the crawler is loaded
    fn validate(&self, _params: &Map<String, Value>) -> Result<(), StageError> {
        Ok(())
    }
}

/// Maps `method` tags to handler implementations
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the `seed`, `sequence`, `fetch` and `parse` handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("seed", Arc::new(handlers::SeedHandler));
        registry.register("sequence", Arc::new(handlers::SequenceHandler));
        registry.register("fetch", Arc::new(handlers::FetchHandler));
        registry.register("parse", Arc::new(handlers::ParseHandler));
        registry
    }

    /// Registers (or replaces) the handler for `method`
    pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(method).cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}
