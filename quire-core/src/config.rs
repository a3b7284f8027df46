//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::DEFAULT_TARGET_WORD_COUNT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Main configuration struct matching the quire.yml schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub autosave: AutosaveConfig,

    #[serde(default)]
    pub books: BooksConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub proofreading: Option<ProofreadingConfig>,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before content is persisted
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Consecutive failed saves after which automatic retries pause until
    /// the next edit or manual save
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound on the backoff between automatic retries
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
}

fn default_debounce_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    10
}

fn default_max_retry_delay_secs() -> u64 {
    300
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            max_retries: default_max_retries(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooksConfig {
    /// Goal given to books created without one
    #[serde(default = "default_target_word_count")]
    pub default_target_word_count: u32,
}

fn default_target_word_count() -> u32 {
    DEFAULT_TARGET_WORD_COUNT
}

impl Default for BooksConfig {
    fn default() -> Self {
        Self {
            default_target_word_count: default_target_word_count(),
        }
    }
}

/// Which record store backs the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process tables, lost on restart
    #[default]
    Memory,
    /// PostgREST-compatible HTTP endpoint
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Base URL of the REST backend (e.g. https://project.example.co)
    #[serde(default)]
    pub url: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_store_key_env")]
    pub api_key_env: String,

    /// Network timeout per store call; expiry counts as a failed call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_key_env() -> String {
    String::from("QUIRE_STORE_KEY")
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            api_key_env: default_store_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofreadingConfig {
    /// Chat-completions endpoint
    #[serde(default = "default_proofreading_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_proofreading_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_proofreading_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_proofreading_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_proofreading_endpoint() -> String {
    String::from("https://api.openai.com/v1/chat/completions")
}

fn default_proofreading_model() -> String {
    String::from("gpt-4")
}

fn default_proofreading_key_env() -> String {
    String::from("OPENAI_API_KEY")
}

fn default_proofreading_timeout_secs() -> u64 {
    60
}

impl Default for ProofreadingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_proofreading_endpoint(),
            model: default_proofreading_model(),
            api_key_env: default_proofreading_key_env(),
            timeout_secs: default_proofreading_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;

        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path the configuration was loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.autosave.debounce_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "autosave.debounce_secs",
                reason: "must be at least 1 second".into(),
            });
        }
        if self.books.default_target_word_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "books.default_target_word_count",
                reason: "must be positive".into(),
            });
        }
        if self.store.backend == StoreBackend::Rest && self.store.url.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "store.url",
                reason: "required when store.backend is rest".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = Config::from_yaml("{}").unwrap();

        assert_eq!(config.autosave.debounce(), Duration::from_secs(30));
        assert_eq!(config.autosave.max_retries, 10);
        assert_eq!(config.books.default_target_word_count, 50_000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.timeout(), Duration::from_secs(10));
        assert!(config.proofreading.is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "autosave:\n  debounce_secs: 5\nstore:\n  backend: rest\n  url: http://localhost:3000\nproofreading:\n  model: gpt-4o-mini"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.autosave.debounce_secs, 5);
        assert_eq!(config.store.backend, StoreBackend::Rest);
        assert_eq!(config.store.url.as_deref(), Some("http://localhost:3000"));
        let proofreading = config.proofreading.unwrap();
        assert_eq!(proofreading.model, "gpt-4o-mini");
        assert_eq!(proofreading.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = Config::from_yaml("autosave:\n  debounce_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "autosave.debounce_secs", .. }));

        let err = Config::from_yaml("store:\n  backend: rest\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "store.url", .. }));
    }
}
