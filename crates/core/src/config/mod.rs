//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (STASHFETCH_*)
//! 2. TOML config file (if STASHFETCH_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::store::{KeyScheme, StoreConfig};

mod validation;

pub use validation::ConfigError;

/// Which backend holds cached responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One SQLite file with a batching writer.
    #[default]
    Sqlite,
    /// One file per key under a directory.
    Files,
}

/// One rate-limit window: at most `capacity` calls per `period_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowConfig {
    pub capacity: usize,
    pub period_ms: u64,
}

impl RateWindowConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (STASHFETCH_*)
/// 2. TOML config file (if STASHFETCH_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite store, or the root directory for the file store.
    ///
    /// Set via STASHFETCH_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Store backend.
    ///
    /// Set via STASHFETCH_STORE_BACKEND environment variable (`sqlite` or `files`).
    #[serde(default)]
    pub store_backend: StoreBackend,

    /// Idle time before the store writer retires, in milliseconds.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,

    /// Longest a write may stay uncommitted, in milliseconds.
    #[serde(default = "default_commit_spacing_ms")]
    pub commit_spacing_ms: u64,

    /// Capacity of the store job queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Maximum concurrent network requests. 0 disables the cap.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,

    /// Rate-limit windows; every window must have room before a request goes out.
    #[serde(default = "default_rate_limits")]
    pub rate_limits: Vec<RateWindowConfig>,

    /// Store entries under the SHA-256 of the URL instead of the URL itself.
    #[serde(default)]
    pub hashed_keys: bool,

    /// With the file store, never delete stored values.
    #[serde(default)]
    pub files_forever: bool,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via STASHFETCH_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via STASHFETCH_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    std::env::temp_dir().join("stashfetch").join("cache.db")
}

fn default_keepalive_ms() -> u64 {
    2_000
}

fn default_commit_spacing_ms() -> u64 {
    2_000
}

fn default_queue_depth() -> usize {
    64
}

fn default_max_inflight() -> usize {
    5
}

fn default_rate_limits() -> Vec<RateWindowConfig> {
    vec![RateWindowConfig { capacity: 1, period_ms: 3 }, RateWindowConfig { capacity: 20, period_ms: 1_000 }]
}

fn default_user_agent() -> String {
    "stashfetch/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            store_backend: StoreBackend::default(),
            keepalive_ms: default_keepalive_ms(),
            commit_spacing_ms: default_commit_spacing_ms(),
            queue_depth: default_queue_depth(),
            max_inflight: default_max_inflight(),
            rate_limits: default_rate_limits(),
            hashed_keys: false,
            files_forever: false,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Writer settings for the SQLite store.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            keepalive: Duration::from_millis(self.keepalive_ms),
            commit_spacing: Duration::from_millis(self.commit_spacing_ms),
            queue_depth: self.queue_depth,
        }
    }

    pub fn key_scheme(&self) -> KeyScheme {
        if self.hashed_keys { KeyScheme::Hashed } else { KeyScheme::Plain }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `STASHFETCH_`
    /// 2. TOML file from `STASHFETCH_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("STASHFETCH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("STASHFETCH_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
