//! Crawlers and their scheduling
//!
//! # Components
//!
//! - `Schedule`: parsed schedule expression
//! - `Crawler`: one pipeline with its schedule, enable flag and lifecycle
//!   operations (run, flush, cleanup)
//! - `CrawlerRegistry`: every crawler of the process, bulk operations
//! - `Beat`: the periodic scheduler loop

mod beat;
mod lifecycle;
mod registry;
mod schedule;

pub use beat::Beat;
pub use lifecycle::{CleanupReport, Crawler, FlushReport};
pub use registry::{CrawlerListing, CrawlerRegistry, ScheduledReport};
pub use schedule::{Schedule, ScheduleError};
