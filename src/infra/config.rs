// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infra::errors::PipelineError;
use crate::infra::paths;

/// Environment variable holding the gateway API key (overrides config).
pub const API_KEY_ENV: &str = "EDITSTREAM_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// Shared secret expected in the X-API-Key header. Auth is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".into(),
            port: 8080,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub topic: String,
    pub partitions: u32,
    pub poll_interval_ms: u64,
    pub batch_size: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            topic: "code_events".into(),
            partitions: 3,
            poll_interval_ms: 250,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub enabled: bool,
    pub group_id: String,
    pub workers: u32,
    pub flush_interval_secs: u64,
    /// Upper bound on a single merge-upsert call; none means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_timeout_secs: Option<u64>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_id: "session-analytics".into(),
            workers: 1,
            flush_interval_secs: 30,
            merge_timeout_secs: Some(10),
        }
    }
}

impl AggregationConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn merge_timeout(&self) -> Option<Duration> {
        self.merge_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub group_id: String,
    pub workers: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_id: "event-persistence".into(),
            workers: 1,
            retry_backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. Defaults to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl StorageConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(paths::db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.gateway.api_key = Some(key);
            }
        }
        self
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.log.partitions == 0 {
            return Err(PipelineError::Config("log.partitions must be > 0".into()));
        }
        if self.log.batch_size == 0 {
            return Err(PipelineError::Config("log.batch_size must be > 0".into()));
        }
        if self.log.topic.trim().is_empty() {
            return Err(PipelineError::Config("log.topic must not be blank".into()));
        }
        if self.aggregation.workers == 0 || self.persistence.workers == 0 {
            return Err(PipelineError::Config("worker counts must be > 0".into()));
        }
        if self.aggregation.flush_interval_secs == 0 {
            return Err(PipelineError::Config(
                "aggregation.flush_interval_secs must be > 0".into(),
            ));
        }
        if self.aggregation.group_id == self.persistence.group_id {
            return Err(PipelineError::Config(
                "aggregation and persistence must use distinct consumer groups".into(),
            ));
        }
        Ok(())
    }
}
