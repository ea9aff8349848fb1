use crate::config::types::{CrawlerDefinition, Settings};
use crate::config::validation::{validate_definition, validate_definitions, validate_settings};
use crate::ConfigError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "CRAWLBEAT_";

/// Loads settings from the process environment
///
/// Unset variables keep their defaults. See [`load_settings_from`].
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(|key| std::env::var(key).ok())
}

/// Loads settings using `lookup` to resolve environment variables
///
/// # Arguments
///
/// * `lookup` - Resolves a full variable name (e.g. `CRAWLBEAT_WORKERS`)
///
/// # Returns
///
/// * `Ok(Settings)` - Defaults overlaid with every variable that was set
/// * `Err(ConfigError)` - A variable could not be parsed or failed validation
pub fn load_settings_from<F>(lookup: F) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };
    let mut settings = Settings::default();

    if let Some(v) = env.bool("DEBUG")? {
        settings.debug = v;
    }
    if let Some(v) = env.bool("HTTP_CACHE")? {
        settings.http_cache = v;
    }
    if let Some(v) = env.bool("INCREMENTAL")? {
        settings.incremental = v;
    }
    if let Some(v) = env.number::<u64>("BEAT_INTERVAL")? {
        settings.beat_interval = Duration::from_secs(v);
    }
    if let Some(v) = env.string("DATABASE_PATH") {
        settings.database_path = PathBuf::from(v);
    }
    if let Some(v) = env.string("CONFIG_PATH") {
        settings.config_path = PathBuf::from(v);
    }
    if let Some(v) = env.number::<usize>("WORKERS")? {
        settings.workers = v;
    }
    if let Some(v) = env.number::<u32>("MAX_RETRIES")? {
        settings.max_retries = v;
    }
    if let Some(v) = env.number::<u64>("RETRY_DELAY")? {
        settings.retry_delay = Duration::from_secs(v);
    }
    if let Some(v) = env.number::<u64>("LEASE_TIMEOUT")? {
        settings.lease_timeout = Duration::from_secs(v);
    }
    if let Some(v) = env.number::<u64>("POLL_INTERVAL")? {
        settings.poll_interval = Duration::from_millis(v);
    }
    if let Some(v) = env.number::<u64>("CACHE_TTL")? {
        settings.cache_ttl = Duration::from_secs(v);
    }
    if let Some(v) = env.number::<u32>("MAX_DEPTH")? {
        settings.max_depth = v;
    }
    if let Some(v) = env.number::<usize>("MAX_FANOUT")? {
        settings.max_fanout = v;
    }
    if let Some(v) = env.string("USER_AGENT") {
        settings.user_agent = v;
    }
    if let Some(v) = env.number::<u64>("HTTP_TIMEOUT")? {
        settings.http_timeout = Duration::from_secs(v);
    }

    validate_settings(&settings)?;
    Ok(settings)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.string(name) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Env {
                var: format!("{}{}", ENV_PREFIX, name),
                message: format!("expected a boolean, got '{}'", raw),
            }),
        }
    }

    fn number<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        let Some(raw) = self.string(name) else {
            return Ok(None);
        };
        raw.parse::<T>().map(Some).map_err(|_| ConfigError::Env {
            var: format!("{}{}", ENV_PREFIX, name),
            message: format!("expected a non-negative number, got '{}'", raw),
        })
    }
}

/// Loads and validates a single crawler definition file
pub fn load_crawler_definition(path: &Path) -> Result<CrawlerDefinition, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let definition: CrawlerDefinition =
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    validate_definition(&definition)?;

    Ok(definition)
}

/// Loads every crawler definition under `path`
///
/// A directory is scanned for `*.toml` files in file-name order; a file is
/// loaded on its own. Crawler names must be unique across all files.
pub fn load_crawler_definitions(path: &Path) -> Result<Vec<CrawlerDefinition>, ConfigError> {
    let files = if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file = entry?.path();
            if file.is_file() && file.extension().is_some_and(|ext| ext == "toml") {
                files.push(file);
            }
        }
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut definitions = Vec::with_capacity(files.len());
    for file in &files {
        tracing::debug!("Loading crawler definition from {}", file.display());
        definitions.push(load_crawler_definition(file)?);
    }

    validate_definitions(&definitions)?;

    Ok(definitions)
}
