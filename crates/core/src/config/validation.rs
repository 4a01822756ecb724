//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, LimiterConfig};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_pages` or `batch_size` is 0
    /// - the cache has no capacity or a zero TTL
    /// - any limiter bound is out of range
    /// - a profile has no table name
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_pages == 0 {
            return Err(invalid("max_pages", "must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than 0"));
        }

        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }

        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be greater than 0"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs", "must be greater than 0"));
        }

        self.limiter.validate()?;

        for profile in &self.profiles {
            if profile.table_name.trim().is_empty() {
                return Err(invalid("profiles.table_name", "must not be empty"));
            }
            if profile.unique_key_columns.is_empty() {
                tracing::warn!(
                    profile = %profile.name,
                    "profile has no unique key columns; rows will be deduplicated by full content"
                );
            }
        }

        Ok(())
    }
}

impl LimiterConfig {
    /// Validate the limiter bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_rate.is_nan() || self.min_rate <= 0.0 {
            return Err(invalid("limiter.min_rate", "must be greater than 0"));
        }
        if self.min_rate > self.max_rate {
            return Err(invalid("limiter.min_rate", "must not exceed limiter.max_rate"));
        }
        if !(self.min_rate..=self.max_rate).contains(&self.tokens_per_second) {
            return Err(invalid("limiter.tokens_per_second", "must lie within [min_rate, max_rate]"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("limiter.max_tokens", "must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(invalid("limiter.max_retries", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(invalid("limiter.jitter_factor", "must lie within [0, 1)"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(invalid("limiter.backoff_multiplier", "must be at least 1"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(invalid("limiter.base_backoff_ms", "must not exceed limiter.max_backoff_ms"));
        }
        if self.increase_factor.is_nan() || self.increase_factor <= 1.0 {
            return Err(invalid("limiter.increase_factor", "must be greater than 1"));
        }
        if !(0.0..1.0).contains(&self.decrease_factor) || self.decrease_factor == 0.0 {
            return Err(invalid("limiter.decrease_factor", "must lie within (0, 1)"));
        }
        if self.success_threshold == 0 || self.failure_threshold == 0 {
            return Err(invalid("limiter.success_threshold", "thresholds must be at least 1"));
        }
        Ok(())
    }
}
