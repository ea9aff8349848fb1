use crate::config::types::{CrawlerDefinition, Settings, StageConfig};
use crate::ConfigError;
use std::collections::HashSet;
use std::time::Duration;

/// Longest allowed incremental window and cache lifetime, in days
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Validates process settings
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.workers < 1 || settings.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            settings.workers
        )));
    }

    if settings.beat_interval < Duration::from_secs(1) {
        return Err(ConfigError::Validation(
            "beat_interval must be at least 1 second".to_string(),
        ));
    }

    if settings.max_retries > 100 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 100, got {}",
            settings.max_retries
        )));
    }

    if settings.lease_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "lease_timeout must be greater than zero".to_string(),
        ));
    }

    if settings.poll_interval < Duration::from_millis(10) {
        return Err(ConfigError::Validation(
            "poll_interval must be >= 10ms".to_string(),
        ));
    }

    if settings.max_depth < 1 {
        return Err(ConfigError::Validation(
            "max_depth must be >= 1".to_string(),
        ));
    }

    if settings.max_fanout < 1 {
        return Err(ConfigError::Validation(
            "max_fanout must be >= 1".to_string(),
        ));
    }

    if settings.cache_ttl > Duration::from_secs(u64::from(MAX_RETENTION_DAYS) * 86_400) {
        return Err(ConfigError::Validation(format!(
            "cache_ttl must be at most {} days",
            MAX_RETENTION_DAYS
        )));
    }

    if settings.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if settings.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a single crawler definition
///
/// Schedules and handler types are checked later, when the registry is
/// built: a bad schedule only disables that crawler, and handler types
/// depend on which handlers are registered.
pub fn validate_definition(definition: &CrawlerDefinition) -> Result<(), ConfigError> {
    validate_name(&definition.name)?;

    if definition.stages.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Crawler '{}' must define at least one stage",
            definition.name
        )));
    }

    if definition.expire < 1 || definition.expire > MAX_RETENTION_DAYS {
        return Err(ConfigError::Validation(format!(
            "Crawler '{}': expire must be between 1 and {} days, got {}",
            definition.name, MAX_RETENTION_DAYS, definition.expire
        )));
    }

    let mut stage_names = HashSet::new();
    for stage in &definition.stages {
        validate_stage(&definition.name, stage)?;
        if !stage_names.insert(stage.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Crawler '{}' defines stage '{}' more than once",
                definition.name, stage.name
            )));
        }
    }

    if let Some(entry) = &definition.entry {
        if !stage_names.contains(entry.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Crawler '{}': entry stage '{}' does not exist",
                definition.name, entry
            )));
        }
    }

    for stage in &definition.stages {
        for (rule, target) in &stage.handle {
            if !stage_names.contains(target.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Crawler '{}': stage '{}' routes '{}' to unknown stage '{}'",
                    definition.name, stage.name, rule, target
                )));
            }
        }
    }

    Ok(())
}

/// Validates a set of definitions that will share one registry
pub fn validate_definitions(definitions: &[CrawlerDefinition]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for definition in definitions {
        if !names.insert(definition.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Crawler name '{}' is defined more than once",
                definition.name
            )));
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_stage(crawler: &str, stage: &StageConfig) -> Result<(), ConfigError> {
    if stage.name.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Crawler '{}' has a stage without a name",
            crawler
        )));
    }

    if stage.method.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Crawler '{}': stage '{}' has no method",
            crawler, stage.name
        )));
    }

    Ok(())
}
