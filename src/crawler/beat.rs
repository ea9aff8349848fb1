//! The scheduler loop
//!
//! Calls [`CrawlerRegistry::run_scheduled`] once per interval until the
//! shutdown signal is set. Failures of individual crawlers are reported by
//! the pass and never stop the loop; infrastructure failures do.

use crate::crawler::{CrawlerRegistry, ScheduledReport};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Beat {
    registry: Arc<CrawlerRegistry>,
    interval: Duration,
}

impl Beat {
    pub fn new(registry: Arc<CrawlerRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Runs a single scheduling pass
    pub fn tick(&self) -> Result<ScheduledReport> {
        let report = self.registry.run_scheduled()?;

        for (crawler, run_id) in &report.started {
            tracing::info!(crawler = %crawler, run_id = %run_id, "Scheduled run");
        }
        if !report.errors.is_empty() {
            tracing::warn!("{} crawler(s) failed during this pass", report.errors.len());
        }

        Ok(report)
    }

    /// Loops until `shutdown` is set or its sender is dropped
    ///
    /// # Returns
    ///
    /// The number of passes made
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<u64> {
        tracing::info!(interval_secs = self.interval.as_secs(), crawlers = self.registry.len(), "Beat started");
        let mut passes = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick()?;
            passes += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(passes, "Beat stopped");
        Ok(passes)
    }
}
