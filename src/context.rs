//! Application context
//!
//! Everything a command needs is built once at startup and passed down
//! explicitly: settings, the clock, the shared services and the registries.

use crate::cache::{HttpCache, HttpFetcher};
use crate::clock::{Clock, SystemClock};
use crate::config::{load_crawler_definitions, validate_settings};
use crate::crawler::{Beat, Crawler, CrawlerRegistry};
use crate::incremental::IncrementalStore;
use crate::pipeline::HandlerRegistry;
use crate::queue::{TaskQueue, TaskRunner};
use crate::storage::{open_storage, SharedStorage};
use crate::{CrawlerDefinition, Result, Settings};
use std::sync::Arc;

/// Shared services, cheap to clone
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<Settings>,
    pub clock: Arc<dyn Clock>,
    pub storage: SharedStorage,
    pub queue: Arc<TaskQueue>,
    pub incremental: Arc<IncrementalStore>,
    pub cache: Arc<HttpCache>,
    pub fetcher: HttpFetcher,
}

impl Services {
    pub fn new(settings: Settings, clock: Arc<dyn Clock>, storage: SharedStorage) -> Result<Self> {
        let queue = TaskQueue::new(storage.clone(), clock.clone(), &settings);
        let incremental = IncrementalStore::new(storage.clone(), clock.clone(), settings.incremental);
        let cache = HttpCache::new(
            storage.clone(),
            clock.clone(),
            settings.http_cache,
            settings.cache_ttl,
        );
        let fetcher = HttpFetcher::new(&settings)?;

        Ok(Self {
            settings: Arc::new(settings),
            clock,
            storage,
            queue: Arc::new(queue),
            incremental: Arc::new(incremental),
            cache: Arc::new(cache),
            fetcher,
        })
    }
}

/// The context constructed once per process
pub struct AppContext {
    pub services: Services,
    pub handlers: Arc<HandlerRegistry>,
    pub registry: Arc<CrawlerRegistry>,
}

impl AppContext {
    /// Opens the database and loads crawler definitions from the paths in
    /// `settings`, using the wall clock and the built-in handlers
    pub fn init(settings: Settings) -> Result<Self> {
        validate_settings(&settings)?;

        tracing::info!(path = %settings.config_path.display(), "Loading crawler definitions");
        let definitions = load_crawler_definitions(&settings.config_path)?;

        let storage = open_storage(&settings.database_path)?;
        tracing::debug!(path = %settings.database_path.display(), "Opened database");

        Self::from_parts(
            settings,
            Arc::new(SystemClock),
            storage,
            HandlerRegistry::with_builtins(),
            definitions,
        )
    }

    /// Assembles a context from already loaded parts
    pub fn from_parts(
        settings: Settings,
        clock: Arc<dyn Clock>,
        storage: SharedStorage,
        handlers: HandlerRegistry,
        definitions: Vec<CrawlerDefinition>,
    ) -> Result<Self> {
        let services = Services::new(settings, clock, storage)?;
        let registry = CrawlerRegistry::new(definitions, &handlers, services.clone())?;

        tracing::info!(crawlers = registry.len(), "Crawler registry ready");

        Ok(Self {
            services,
            handlers: Arc::new(handlers),
            registry: Arc::new(registry),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.services.settings
    }

    pub fn crawler(&self, name: &str) -> Result<Arc<Crawler>> {
        self.registry.get(name)
    }

    pub fn runner(&self) -> Arc<TaskRunner> {
        Arc::new(TaskRunner::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.handlers),
            self.services.clone(),
        ))
    }

    pub fn beat(&self) -> Beat {
        Beat::new(Arc::clone(&self.registry), self.services.settings.beat_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::open_in_memory;
    use crate::{CrawlbeatError, StageConfig};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn definition(name: &str, method: &str) -> CrawlerDefinition {
        let mut params = serde_json::Map::new();
        params.insert("url".to_string(), "https://example.com/".into());
        CrawlerDefinition {
            name: name.to_string(),
            description: String::new(),
            schedule: Some("daily".to_string()),
            disabled: false,
            expire: 1,
            entry: None,
            stages: vec![StageConfig {
                name: "init".to_string(),
                method: method.to_string(),
                params,
                handle: BTreeMap::new(),
            }],
        }
    }

    fn build(definitions: Vec<CrawlerDefinition>) -> Result<AppContext> {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        AppContext::from_parts(
            Settings::default(),
            clock,
            open_in_memory()?,
            HandlerRegistry::with_builtins(),
            definitions,
        )
    }

    #[test]
    fn test_registry_in_name_order() {
        let ctx = build(vec![definition("zeta", "seed"), definition("alpha", "seed")]).unwrap();
        let names: Vec<_> = ctx.registry.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_duplicate_crawler_rejected() {
        let result = build(vec![definition("dup", "seed"), definition("dup", "seed")]);
        assert!(matches!(result, Err(CrawlbeatError::DuplicateCrawler(name)) if name == "dup"));
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result = build(vec![definition("c", "store")]);
        assert!(matches!(result, Err(CrawlbeatError::Pipeline { .. })));
    }

    #[test]
    fn test_crawler_not_found() {
        let ctx = build(vec![definition("c", "seed")]).unwrap();
        assert!(ctx.crawler("c").is_ok());
        assert!(matches!(
            ctx.crawler("missing"),
            Err(CrawlbeatError::CrawlerNotFound(_))
        ));
    }
}
