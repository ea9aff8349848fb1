use crate::config::validate_definition;
use crate::context::Services;
use crate::crawler::{CleanupReport, Crawler};
use crate::pipeline::HandlerRegistry;
use crate::state::DueState;
use crate::{CrawlbeatError, CrawlerDefinition, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduledReport {
    /// `(crawler, run_id)` of every run started
    pub started: Vec<(String, String)>,

    /// `(crawler, error)` of every crawler that failed; the pass went on
    pub errors: Vec<(String, String)>,
}

/// One row of the `list` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerListing {
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub due: DueState,
}

/// All crawlers of the process, keyed by name
pub struct CrawlerRegistry {
    crawlers: BTreeMap<String, Arc<Crawler>>,
    services: Services,
}

impl CrawlerRegistry {
    /// Builds the registry, failing fast on invalid pipelines
    ///
    /// Checks unique names, stage graphs and that every stage `method` has a
    /// registered handler accepting its parameters. Schedules are not
    /// checked here; see [`Crawler::new`].
    pub fn new(
        definitions: Vec<CrawlerDefinition>,
        handlers: &HandlerRegistry,
        services: Services,
    ) -> Result<Self> {
        let mut crawlers = BTreeMap::new();
        for definition in definitions {
            if crawlers.contains_key(&definition.name) {
                return Err(CrawlbeatError::DuplicateCrawler(definition.name));
            }
            validate_definition(&definition)?;
            check_handlers(&definition, handlers)?;

            tracing::debug!(crawler = %definition.name, stages = definition.stages.len(), "Registered crawler");
            let crawler = Arc::new(Crawler::new(definition, services.clone()));
            crawlers.insert(crawler.name().to_string(), crawler);
        }

        Ok(Self { crawlers, services })
    }

    /// Looks up a crawler by name
    pub fn get(&self, name: &str) -> Result<Arc<Crawler>> {
        self.find(name)
            .cloned()
            .ok_or_else(|| CrawlbeatError::CrawlerNotFound(name.to_string()))
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Crawler>> {
        self.crawlers.get(name)
    }

    /// Crawlers in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Crawler>> {
        self.crawlers.values()
    }

    pub fn len(&self) -> usize {
        self.crawlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crawlers.is_empty()
    }

    /// Starts every enabled crawler that is due
    ///
    /// Each due crawler is cleaned up, run and cleaned up again. A failing
    /// crawler is logged and reported without stopping the pass; only
    /// infrastructure failures abort it.
    pub fn run_scheduled(&self) -> Result<ScheduledReport> {
        let now = self.services.clock.now();
        let mut report = ScheduledReport::default();

        for crawler in self.iter() {
            if crawler.is_disabled() {
                continue;
            }

            match run_if_due(crawler, now) {
                Ok(Some(run_id)) => report.started.push((crawler.name().to_string(), run_id)),
                Ok(None) => {}
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    tracing::error!(crawler = crawler.name(), "Scheduled run failed: {}", e);
                    report.errors.push((crawler.name().to_string(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Runs `cleanup()` on every crawler
    pub fn run_cleanup(&self) -> Result<Vec<(String, CleanupReport)>> {
        self.iter()
            .map(|crawler| Ok((crawler.name().to_string(), crawler.cleanup()?)))
            .collect()
    }

    /// Name, description, schedule and due state of every crawler
    pub fn listing(&self, now: DateTime<Utc>) -> Result<Vec<CrawlerListing>> {
        self.iter()
            .map(|crawler| {
                Ok(CrawlerListing {
                    name: crawler.name().to_string(),
                    description: crawler.description().to_string(),
                    schedule: crawler.schedule_expr().unwrap_or("-").to_string(),
                    due: crawler.due_state(now)?,
                })
            })
            .collect()
    }
}

fn run_if_due(crawler: &Crawler, now: DateTime<Utc>) -> Result<Option<String>> {
    if !crawler.check_due(now)? {
        return Ok(None);
    }

    crawler.start().map(Some)
}

fn check_handlers(definition: &CrawlerDefinition, handlers: &HandlerRegistry) -> Result<()> {
    for stage in &definition.stages {
        let handler = handlers
            .get(&stage.method)
            .ok_or_else(|| CrawlbeatError::Pipeline {
                crawler: definition.name.clone(),
                message: format!(
                    "stage '{}' uses unknown method '{}' (known: {})",
                    stage.name,
                    stage.method,
                    handlers.methods().join(", ")
                ),
            })?;

        handler
            .validate(&stage.params)
            .map_err(|e| CrawlbeatError::Pipeline {
                crawler: definition.name.clone(),
                message: format!("stage '{}': {}", stage.name, e),
            })?;
    }
    Ok(())
}
