use drgreen::{CacheConfig, UpstreamConfig};
use serde::Deserialize;
use std::fs::File;
use store::config::StoreConfig;
use synchronizer::{ClientSyncOptions, RehomeConfig, StrainSyncOptions};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("Port cannot be 0")]
    InvalidPort,
    #[error("listener and admin_listener must not share {0}")]
    ListenerConflict(String),
    #[error("upstream.timeout_ms must be greater than 0")]
    InvalidTimeout,
    #[error("upstream.base_url must use http or https, got {0}")]
    InvalidBaseUrl(String),
    #[error("cache.max_capacity must be greater than 0")]
    InvalidCacheCapacity,
    #[error("rehome.batch_size must be greater than 0")]
    InvalidBatchSize,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

fn default_listener() -> Listener {
    Listener {
        host: "0.0.0.0".into(),
        port: 8000,
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "0.0.0.0".into(),
        port: 8001,
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            sentry_dsn: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Defaults for the job subcommands. HTTP callers pass their own options.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct JobsConfig {
    #[serde(default)]
    pub sync_strains: StrainSyncOptions,
    #[serde(default)]
    pub sync_clients: ClientSyncOptions,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_listener")]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rehome: RehomeConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener == self.admin_listener {
            return Err(ConfigError::ListenerConflict(format!(
                "{}:{}",
                self.listener.host, self.listener.port
            )));
        }

        if self.upstream.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        let scheme = self.upstream.base_url.scheme();
        if scheme != "https" && scheme != "http" {
            return Err(ConfigError::InvalidBaseUrl(scheme.to_string()));
        }
        if self.cache.max_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }
        if self.rehome.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        Ok(())
    }
}
