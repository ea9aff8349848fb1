//! Integration tests for Crawlbeat
//!
//! Pipelines run against wiremock servers; time-dependent behavior uses a
//! manual clock.

mod common;
mod lifecycle_tests;
mod pipeline_tests;
mod queue_tests;
mod schedule_tests;
