//! Rate limiter and request cache settings.
//!
//! These live in core so `AppConfig` can carry them; the limiter itself is in
//! the client crate.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Token bucket, backoff and adaptation settings for the outbound limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Initial refill rate in tokens per second.
    pub tokens_per_second: f64,
    /// Bucket capacity (burst size).
    pub max_tokens: u32,
    /// Backoff base before the first retry.
    pub base_backoff_ms: u64,
    /// Backoff cap.
    pub max_backoff_ms: u64,
    /// Exponential growth per attempt.
    pub backoff_multiplier: f64,
    /// Symmetric jitter as a fraction of the computed backoff.
    pub jitter_factor: f64,
    /// Maximum attempts per operation, including the first.
    pub max_retries: u32,
    /// Whether the refill rate adapts to observed outcomes.
    pub adaptive: bool,
    /// Consecutive successes before the rate is raised.
    pub success_threshold: u32,
    /// Consecutive rate-limited responses before the rate is lowered.
    pub failure_threshold: u32,
    /// Multiplier applied when raising the rate.
    pub increase_factor: f64,
    /// Multiplier applied when lowering the rate.
    pub decrease_factor: f64,
    /// Rate floor in tokens per second.
    pub min_rate: f64,
    /// Rate ceiling in tokens per second.
    pub max_rate: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            tokens_per_second: 0.2,
            max_tokens: 5,
            base_backoff_ms: 5_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_retries: 5,
            adaptive: true,
            success_threshold: 10,
            failure_threshold: 2,
            increase_factor: 1.1,
            decrease_factor: 0.5,
            min_rate: 0.01,
            max_rate: 1.0,
        }
    }
}

impl LimiterConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Request cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether fetched pages are cached at all.
    pub enabled: bool,
    /// Maximum entries held in memory.
    pub max_entries: usize,
    /// Entry lifetime in seconds, shared by both tiers.
    pub ttl_secs: u64,
    /// Directory for the disk tier; `None` keeps the cache memory-only.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, max_entries: 1000, ttl_secs: 3600, dir: Some(PathBuf::from(".api_cache")) }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_defaults_are_bounded() {
        let config = LimiterConfig::default();
        assert!(config.min_rate <= config.tokens_per_second);
        assert!(config.tokens_per_second <= config.max_rate);
        assert_eq!(config.base_backoff(), Duration::from_secs(5));
        assert_eq!(config.max_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn test_cache_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.ttl(), Duration::from_secs(3600));
    }
}
