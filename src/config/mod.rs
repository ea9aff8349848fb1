//! Configuration module for Crawlbeat
//!
//! Settings come from `CRAWLBEAT_*` environment variables; crawler
//! definitions are TOML files, one crawler per file.
//!
//! # Example
//!
//! ```no_run
//! use crawlbeat::config::{load_crawler_definitions, load_settings};
//!
//! let settings = load_settings().unwrap();
//! let crawlers = load_crawler_definitions(&settings.config_path).unwrap();
//! println!("Loaded {} crawlers", crawlers.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{CrawlerDefinition, Settings, StageConfig};

// Re-export parser functions
pub use parser::{
    load_crawler_definition, load_crawler_definitions, load_settings, load_settings_from,
    ENV_PREFIX,
};
pub use validation::{validate_definition, validate_settings};
