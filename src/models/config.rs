//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote index service credentials and client behavior
    #[serde(default)]
    pub algolia: AlgoliaConfig,

    /// Target collection and its settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Batch sizing and fan-out
    #[serde(default)]
    pub batch: BatchConfig,

    /// Drop guard applied before staging is touched
    #[serde(default)]
    pub guard: GuardConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Fill empty credentials from `ALGOLIA_APP_ID` / `ALGOLIA_API_KEY`.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Fill empty credentials from the given variable lookup.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.algolia.app_id.trim().is_empty() {
            if let Some(app_id) = lookup("ALGOLIA_APP_ID") {
                self.algolia.app_id = app_id;
            }
        }
        if self.algolia.api_key.trim().is_empty() {
            if let Some(api_key) = lookup("ALGOLIA_API_KEY") {
                self.algolia.api_key = api_key;
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.index.name.trim().is_empty() {
            return Err(AppError::validation("index.name is empty"));
        }
        if self.batch.batch_size == 0 {
            return Err(AppError::validation("batch.batch_size must be > 0"));
        }
        if self.batch.concurrency == 0 {
            return Err(AppError::validation("batch.concurrency must be > 0"));
        }
        if self.batch.manifest_bucket_size == 0 {
            return Err(AppError::validation(
                "batch.manifest_bucket_size must be > 0",
            ));
        }
        if self.algolia.timeout_secs == 0 {
            return Err(AppError::validation("algolia.timeout_secs must be > 0"));
        }
        if self.algolia.browse_page_size == 0 {
            return Err(AppError::validation("algolia.browse_page_size must be > 0"));
        }
        if self.guard.max_drop_percent > 100 {
            return Err(AppError::validation(
                "guard.max_drop_percent must be within 0-100",
            ));
        }
        if let Some(settings) = &self.index.settings {
            if !settings.is_object() {
                return Err(AppError::validation("index.settings must be a table"));
            }
        }
        Ok(())
    }

    /// Ensure credentials are present for commands talking to the service.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.algolia.app_id.trim().is_empty() {
            return Err(AppError::config(
                "algolia.app_id is empty (set it or ALGOLIA_APP_ID)",
            ));
        }
        if self.algolia.api_key.trim().is_empty() {
            return Err(AppError::config(
                "algolia.api_key is empty (set it or ALGOLIA_API_KEY)",
            ));
        }
        Ok(())
    }
}

/// Remote index service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoliaConfig {
    /// Application identifier
    #[serde(default)]
    pub app_id: String,

    /// Admin API key
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between two task status polls in milliseconds
    #[serde(default = "defaults::task_poll_interval")]
    pub task_poll_interval_ms: u64,

    /// Hits requested per browse page
    #[serde(default = "defaults::browse_page_size")]
    pub browse_page_size: usize,
}

impl Default for AlgoliaConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_key: String::new(),
            timeout_secs: defaults::timeout(),
            task_poll_interval_ms: defaults::task_poll_interval(),
            browse_page_size: defaults::browse_page_size(),
        }
    }
}

/// Target collection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexConfig {
    /// Base collection name; staging and manifest names derive from it
    #[serde(default)]
    pub name: String,

    /// Keys overriding the default search settings
    #[serde(default)]
    pub settings: Option<Value>,
}

/// Batch runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Operations per batch request
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Maximum batch requests in flight
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,

    /// Identifiers stored per manifest document
    #[serde(default = "defaults::manifest_bucket_size")]
    pub manifest_bucket_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            concurrency: defaults::concurrency(),
            manifest_bucket_size: defaults::manifest_bucket_size(),
        }
    }
}

/// Record-count drop guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "defaults::guard_enabled")]
    pub enabled: bool,

    /// Maximum allowed drop percentage (0-100)
    #[serde(default = "defaults::max_drop_percent")]
    pub max_drop_percent: u8,

    /// Below this many live documents the check is skipped
    #[serde(default = "defaults::min_baseline")]
    pub min_baseline: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::guard_enabled(),
            max_drop_percent: defaults::max_drop_percent(),
            min_baseline: defaults::min_baseline(),
        }
    }
}

mod defaults {
    pub fn timeout() -> u64 {
        30
    }
    pub fn task_poll_interval() -> u64 {
        500
    }
    pub fn browse_page_size() -> usize {
        1000
    }
    pub fn batch_size() -> usize {
        1000
    }
    pub fn concurrency() -> usize {
        10
    }
    pub fn manifest_bucket_size() -> usize {
        100
    }
    pub fn guard_enabled() -> bool {
        true
    }
    pub fn max_drop_percent() -> u8 {
        20
    }
    pub fn min_baseline() -> usize {
        10
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.batch.batch_size, 1000);
        assert_eq!(config.batch.concurrency, 10);
        assert_eq!(config.batch.manifest_bucket_size, 100);
        assert_eq!(config.algolia.task_poll_interval_ms, 500);
        assert!(config.guard.enabled);
        assert!(config.index.settings.is_none());
    }

    #[test]
    fn test_parse_settings_table() {
        let config = Config::parse(
            r#"
            [index]
            name = "laracon"

            [index.settings]
            distinct = false
            customRanking = ["desc(video.popularity.score)"]

            [batch]
            concurrency = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.index.name, "laracon");
        assert_eq!(config.batch.concurrency, 4);
        let settings = config.index.settings.as_ref().unwrap();
        assert_eq!(settings["distinct"], false);
        assert_eq!(settings["customRanking"][0], "desc(video.popularity.score)");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[index]\nname = \"talks\"\n[algolia]\napp_id = \"APP\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.index.name, "talks");
        assert_eq!(config.algolia.app_id, "APP");
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.toml"));
        assert_eq!(config.batch.batch_size, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.validate().is_err()); // empty index name

        config.index.name = "talks".into();
        assert!(config.validate().is_ok());

        config.batch.concurrency = 0;
        assert!(config.validate().is_err());
        config.batch.concurrency = 1;

        config.guard.max_drop_percent = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env_only_fills_empty_values() {
        let mut config = Config::default();
        config.algolia.api_key = "from-file".into();

        config.apply_env_with(|key| Some(format!("env-{key}")));

        assert_eq!(config.algolia.app_id, "env-ALGOLIA_APP_ID");
        assert_eq!(config.algolia.api_key, "from-file");
        assert!(config.validate_credentials().is_ok());
    }

    #[test]
    fn test_missing_credentials_are_rejected() {
        let config = Config::default();
        assert!(config.validate_credentials().is_err());
    }
}
