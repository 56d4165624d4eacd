//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `queue_depth` is 0
    /// - any rate-limit window has zero capacity or a zero period
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid { field: "queue_depth".into(), reason: "must be greater than 0".into() });
        }

        for (i, window) in self.rate_limits.iter().enumerate() {
            if window.capacity == 0 {
                return Err(ConfigError::Invalid {
                    field: format!("rate_limits[{i}].capacity"),
                    reason: "must be greater than 0".into(),
                });
            }
            if window.period_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: format!("rate_limits[{i}].period_ms"),
                    reason: "must be greater than 0".into(),
                });
            }
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.commit_spacing_ms > self.keepalive_ms.saturating_mul(10) {
            tracing::warn!(
                commit_spacing_ms = self.commit_spacing_ms,
                keepalive_ms = self.keepalive_ms,
                "commit spacing is much longer than the writer keepalive; \
                 writes will mostly be committed when the writer retires"
            );
        }

        Ok(())
    }
}
