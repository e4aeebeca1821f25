//! Configuration for drawcast.
//!
//! Settings come from the environment (after `.env` is loaded by `main`).
//! Only `DRAWCAST_SOURCE_URL` is required, and only by commands that fetch.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::history::memory::DEFAULT_RETENTION;
use crate::model::FitConfig;

/// Draw source settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// `None` when unset; fetching commands reject that via [`Config::require_source_url`].
    pub url: Option<Url>,
    pub timeout: Duration,
}

/// Cadence of the two periodic cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub fetch_interval: Duration,
    pub verify_interval: Duration,
}

/// Forecasting engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Most recent outcomes used for training and prediction.
    pub history_limit: usize,
    /// Pending forecasts examined per verification pass.
    pub verify_batch: usize,
    pub fit: FitConfig,
}

/// Where state lives and how much of it is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Snapshot file; the journal sits next to it as `<data_path>.journal`.
    pub data_path: PathBuf,
    /// Newest outcomes, and resolved forecasts, kept on compaction.
    pub retention: usize,
}

/// Outbound notifications.
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub webhook_url: Option<Url>,
}

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub schedule: ScheduleConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a key to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = FitConfig::default();

        let fit = FitConfig {
            epochs: env.parse_positive("DRAWCAST_EPOCHS", defaults.epochs)?,
            batch_size: env.parse_positive("DRAWCAST_BATCH_SIZE", defaults.batch_size)?,
            validation_split: defaults.validation_split,
            learning_rate: env.parse_or("DRAWCAST_LEARNING_RATE", defaults.learning_rate)?,
            seed: env.parse_or("DRAWCAST_MODEL_SEED", defaults.seed)?,
        };
        if !(fit.learning_rate.is_finite() && fit.learning_rate > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "DRAWCAST_LEARNING_RATE".to_string(),
                message: "must be a positive number".to_string(),
            });
        }

        let data_path = match env.get("DRAWCAST_DATA_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_data_path(),
        };

        let history_limit = env.parse_positive("DRAWCAST_HISTORY_LIMIT", 1000)?;
        let retention = env.parse_positive("DRAWCAST_RETENTION", DEFAULT_RETENTION)?;
        if retention < history_limit {
            return Err(ConfigError::InvalidValue {
                key: "DRAWCAST_RETENTION".to_string(),
                message: format!("must be at least DRAWCAST_HISTORY_LIMIT ({})", history_limit),
            });
        }

        Ok(Self {
            source: SourceConfig {
                url: env.url("DRAWCAST_SOURCE_URL")?,
                timeout: Duration::from_secs(env.parse_positive("DRAWCAST_HTTP_TIMEOUT_SECS", 10)?),
            },
            schedule: ScheduleConfig {
                fetch_interval: Duration::from_secs(
                    env.parse_positive("DRAWCAST_FETCH_INTERVAL_SECS", 30)?,
                ),
                verify_interval: Duration::from_secs(
                    env.parse_positive("DRAWCAST_VERIFY_INTERVAL_SECS", 45)?,
                ),
            },
            engine: EngineConfig {
                history_limit,
                verify_batch: env.parse_positive("DRAWCAST_VERIFY_BATCH", 500)?,
                fit,
            },
            storage: StorageConfig {
                data_path,
                retention,
            },
            notify: NotifyConfig {
                webhook_url: env.url("DRAWCAST_WEBHOOK_URL")?,
            },
        })
    }

    /// The source URL, or an error naming the variable to set.
    pub fn require_source_url(&self) -> Result<&Url, ConfigError> {
        self.source
            .url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "DRAWCAST_SOURCE_URL".to_string(),
                hint: "Set it to the draw history JSON endpoint.".to_string(),
            })
    }
}

/// `~/.drawcast/state.json`, or `./drawcast-state.json` without a home directory.
pub fn default_data_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".drawcast").join("state.json"))
        .unwrap_or_else(|| PathBuf::from("drawcast-state.json"))
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Non-empty trimmed value.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            }),
            None => Ok(default),
        }
    }

    fn parse_positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parse_or(key, default)?;
        if value <= T::default() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn url(&self, key: &str) -> Result<Option<Url>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}': {}", raw, e),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(Some(url))
    }
}
