//! Client configuration
//!
//! Built in three layers, later layers winning:
//! 1. Built-in defaults
//! 2. Optional TOML file (`--config`)
//! 3. JSON overrides (CLI flags, embedders)
//!
//! Layers are merged as JSON with [`deep_merge`], then deserialized into a
//! [`ClientConfig`] and validated.

mod defaults;
mod merge;

pub use defaults::{builtin_defaults, DEFAULT_BASE_URL};
pub use merge::{deep_merge, merge_layers};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheConfig;
use crate::client::transport::HttpConfig;
use crate::paging::PagingConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Schema(#[from] serde_json::Error),

    /// A value is out of range; `key` is its dotted path.
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Invalidation cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_artifacts: usize,
    pub max_artifact_data: usize,
    pub max_cached_content_bytes: u64,
    pub topic: String,
    pub echo_interval_ms: u64,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

/// Listing iterator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingSettings {
    pub page_sizes: Vec<usize>,
    pub queue_capacity: usize,
    pub queue_timeout_seconds: u64,
}

/// Complete client configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    /// Payloads up to this many bytes are fetched for `IF_SMALL`.
    pub small_content_threshold: u64,
    pub cache: CacheSettings,
    pub paging: PagingSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let cache = CacheConfig::default();
        let paging = PagingConfig::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user: None,
            password: None,
            connect_timeout_seconds: 30,
            read_timeout_seconds: 300,
            small_content_threshold: cache.small_content_threshold,
            cache: CacheSettings {
                enabled: cache.enabled,
                max_artifacts: cache.max_artifacts,
                max_artifact_data: cache.max_artifact_data,
                max_cached_content_bytes: cache.max_cached_content_bytes,
                topic: cache.topic,
                echo_interval_ms: cache.echo_interval.as_millis() as u64,
                retry_initial_delay_ms: cache.retry_initial_delay.as_millis() as u64,
                retry_max_delay_ms: cache.retry_max_delay.as_millis() as u64,
            },
            paging: PagingSettings {
                page_sizes: paging.page_sizes,
                queue_capacity: paging.queue_capacity,
                queue_timeout_seconds: paging.queue_timeout.as_secs(),
            },
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("read_timeout_seconds", &self.read_timeout_seconds)
            .field("small_content_threshold", &self.small_content_threshold)
            .field("cache", &self.cache)
            .field("paging", &self.paging)
            .finish()
    }
}

impl ClientConfig {
    /// Load defaults, then `file` (if given), then `overrides`.
    pub fn load(file: Option<&Path>, overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        if let Some(path) = file {
            layers.push(load_toml_file(path)?);
        }
        layers.extend(overrides);
        Self::from_layers(layers)
    }

    /// Merge `layers` over the built-in defaults.
    pub fn from_layers(layers: impl IntoIterator<Item = Value>) -> Result<Self, ConfigError> {
        let merged = merge_layers(std::iter::once(builtin_defaults()).chain(layers));
        let config: ClientConfig = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::Invalid {
                key: key.to_string(),
                message: message.to_string(),
            })
        };

        match url::Url::parse(&self.base_url) {
            Ok(url) if !url.cannot_be_a_base() => {}
            _ => return invalid("base_url", "must be an absolute http(s) URL"),
        }
        if self.connect_timeout_seconds == 0 || self.connect_timeout_seconds > 300 {
            return invalid("connect_timeout_seconds", "must be in (0, 300]");
        }
        if self.read_timeout_seconds == 0 {
            return invalid("read_timeout_seconds", "must be positive");
        }
        if self.cache.max_artifacts == 0 {
            return invalid("cache.max_artifacts", "must be positive");
        }
        if self.cache.max_artifact_data == 0 {
            return invalid("cache.max_artifact_data", "must be positive");
        }
        if self.cache.topic.trim().is_empty() {
            return invalid("cache.topic", "must not be empty");
        }
        if self.cache.retry_initial_delay_ms == 0
            || self.cache.retry_initial_delay_ms > self.cache.retry_max_delay_ms
        {
            return invalid("cache.retry_initial_delay_ms", "must be in (0, cache.retry_max_delay_ms]");
        }
        if self.paging.page_sizes.is_empty() || self.paging.page_sizes.contains(&0) {
            return invalid("paging.page_sizes", "must be a non-empty list of positive sizes");
        }
        if self.paging.queue_capacity == 0 {
            return invalid("paging.queue_capacity", "must be positive");
        }
        if self.paging.queue_timeout_seconds == 0 {
            return invalid("paging.queue_timeout_seconds", "must be positive");
        }
        Ok(())
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.base_url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            read_timeout: Duration::from_secs(self.read_timeout_seconds),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache.enabled,
            max_artifacts: self.cache.max_artifacts,
            max_artifact_data: self.cache.max_artifact_data,
            max_cached_content_bytes: self.cache.max_cached_content_bytes,
            small_content_threshold: self.small_content_threshold,
            topic: self.cache.topic.clone(),
            echo_interval: Duration::from_millis(self.cache.echo_interval_ms),
            retry_initial_delay: Duration::from_millis(self.cache.retry_initial_delay_ms),
            retry_max_delay: Duration::from_millis(self.cache.retry_max_delay_ms),
        }
    }

    pub fn paging_config(&self) -> PagingConfig {
        PagingConfig {
            page_sizes: self.paging.page_sizes.clone(),
            queue_capacity: self.paging.queue_capacity,
            queue_timeout: Duration::from_secs(self.paging.queue_timeout_seconds),
        }
    }
}

fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(toml_to_json(toml::Value::Table(table)))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_only() {
        let config = ClientConfig::load(None, None).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.user.is_none());
        assert_eq!(config.cache.max_artifacts, 500);
        assert_eq!(config.paging_config(), PagingConfig::default());
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_toml_then_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"http://repo.example:24610\"").unwrap();
        writeln!(file, "user = \"lockss\"").unwrap();
        writeln!(file, "[cache]").unwrap();
        writeln!(file, "max_artifacts = 50").unwrap();
        writeln!(file, "[paging]").unwrap();
        writeln!(file, "page_sizes = [10, 500]").unwrap();

        let overrides = json!({"cache": {"enabled": false}, "user": null});
        let config = ClientConfig::load(Some(file.path()), Some(overrides)).unwrap();

        assert_eq!(config.base_url, "http://repo.example:24610");
        assert!(config.user.is_none());
        assert_eq!(config.cache.max_artifacts, 50);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_artifact_data, 20);
        assert_eq!(config.paging.page_sizes, vec![10, 500]);
    }

    #[test]
    fn test_invalid_value_names_key() {
        let err = ClientConfig::from_layers([json!({"paging": {"queue_capacity": 0}})]).unwrap_err();
        match err {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "paging.queue_capacity"),
            other => panic!("unexpected error: {other}"),
        }

        let err = ClientConfig::from_layers([json!({"base_url": "not a url"})]).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_wrong_type_is_schema_error() {
        let err = ClientConfig::from_layers([json!({"read_timeout_seconds": "soon"})]).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
    }

    #[test]
    fn test_unreadable_and_malformed_files() {
        let err = ClientConfig::load(Some(Path::new("/nonexistent/repo.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "base_url = ").unwrap();
        let err = ClientConfig::load(Some(file.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClientConfig::from_layers([json!({"user": "u", "password": "hunter2"})]).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert_eq!(config.http_config().password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_cache_config_conversion() {
        let config = ClientConfig::from_layers([json!({"small_content_threshold": 10, "cache": {"echo_interval_ms": 250}})])
            .unwrap();
        let cache = config.cache_config();
        assert_eq!(cache.small_content_threshold, 10);
        assert_eq!(cache.echo_interval, Duration::from_millis(250));
    }
}
