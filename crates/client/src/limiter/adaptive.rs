//! Retry loop and rate adaptation on top of the token bucket.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rentscout_core::config::LimiterConfig;
use serde::Serialize;
use tokio::time::Instant;

use super::bucket::{TokenBucket, sleep_in_slices};
use super::error::LimitError;
use crate::transport::TransportError;

/// Request instants kept for [`LimiterStats::requests_last_minute`].
const HISTORY_LEN: usize = 100;

/// How a response should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    RateLimited { retry_after: Option<Duration> },
    Rejected,
}

/// A response the limiter can classify.
pub trait LimitedResponse {
    fn verdict(&self) -> Verdict;

    fn status(&self) -> u16;

    /// Short human-readable reason attached to a rejection.
    fn error_message(&self) -> String;
}

/// Read-only limiter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    pub rate: f64,
    pub tokens: f64,
    pub capacity: f64,
    pub requests_last_minute: usize,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_retries: u64,
}

#[derive(Debug, Default)]
struct AdaptState {
    consecutive_successes: u32,
    consecutive_failures: u32,
    total_retries: u64,
    history: VecDeque<Instant>,
}

/// Shared rate limiter with retry, backoff and AIMD-style rate adaptation.
///
/// One instance serves the whole process; clone an `Arc` of it into every task.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    bucket: TokenBucket,
    config: LimiterConfig,
    state: Mutex<AdaptState>,
}

impl AdaptiveLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let bucket = TokenBucket::new(config.tokens_per_second, config.max_tokens);
        Self { bucket, config, state: Mutex::new(AdaptState::default()) }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, AdaptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `operation` until it is accepted, rejected, or out of attempts.
    ///
    /// Each attempt first waits for a token. Rate-limited responses and
    /// transport failures are retried after the server-advised wait or an
    /// exponential backoff with jitter; rejections return at once.
    ///
    /// # Errors
    ///
    /// Returns `LimitError::Rejected` for non-retryable responses and
    /// `LimitError::Exhausted` once `max_retries` attempts have failed.
    pub async fn execute_with_retry<R, F, Fut>(&self, label: &str, mut operation: F) -> Result<R, LimitError>
    where
        R: LimitedResponse,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let granted = self.bucket.consume(1, true).await;
            debug_assert!(granted, "bucket capacity is at least one token");
            self.record_request();

            let wait = match operation().await {
                Ok(response) => match response.verdict() {
                    Verdict::Accepted => {
                        self.observe_success();
                        return Ok(response);
                    }
                    Verdict::Rejected => {
                        let message = response.error_message();
                        tracing::error!(
                            label,
                            status = response.status(),
                            attempt = attempt + 1,
                            %message,
                            "request rejected"
                        );
                        return Err(LimitError::Rejected {
                            label: label.to_string(),
                            status: response.status(),
                            attempt: attempt + 1,
                            message,
                        });
                    }
                    Verdict::RateLimited { retry_after } => {
                        self.observe_failure();
                        let wait = retry_after.unwrap_or_else(|| self.backoff(attempt));
                        tracing::warn!(label, attempt = attempt + 1, wait_ms = wait.as_millis() as u64, "rate limited");
                        wait
                    }
                },
                Err(e) => {
                    let wait = self.backoff(attempt);
                    tracing::warn!(
                        label,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "network error"
                    );
                    last_error = Some(e);
                    wait
                }
            };

            if attempt + 1 < attempts {
                self.state().total_retries += 1;
                sleep_in_slices(wait).await;
            }
        }

        tracing::error!(label, attempts, "retries exhausted");
        Err(LimitError::Exhausted { label: label.to_string(), attempts, last_error })
    }

    /// Backoff before retry number `attempt + 1`: `min(base * multiplier^attempt, max)` with symmetric jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.base_backoff().as_secs_f64();
        let cap = self.config.max_backoff().as_secs_f64();
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = (base * self.config.backoff_multiplier.powi(exp)).min(cap);
        let jitter = delay * self.config.jitter_factor * (fastrand::f64() * 2.0 - 1.0);
        Duration::try_from_secs_f64((delay + jitter).max(0.0)).unwrap_or(self.config.max_backoff())
    }

    fn record_request(&self) {
        let mut state = self.state();
        if state.history.len() == HISTORY_LEN {
            state.history.pop_front();
        }
        state.history.push_back(Instant::now());
    }

    fn observe_success(&self) {
        let mut state = self.state();
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        if state.consecutive_successes < self.config.success_threshold {
            return;
        }
        state.consecutive_successes = 0;
        if !self.config.adaptive {
            return;
        }

        let rate = self.bucket.rate();
        let raised = (rate * self.config.increase_factor).min(self.config.max_rate);
        if raised > rate {
            self.bucket.set_rate(raised);
            tracing::info!(from = rate, rate = raised, "increased request rate");
        }
    }

    fn observe_failure(&self) {
        let mut state = self.state();
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        if state.consecutive_failures < self.config.failure_threshold {
            return;
        }
        state.consecutive_failures = 0;
        if !self.config.adaptive {
            return;
        }

        let rate = self.bucket.rate();
        let lowered = (rate * self.config.decrease_factor).max(self.config.min_rate);
        if lowered < rate {
            self.bucket.set_rate(lowered);
            tracing::warn!(from = rate, rate = lowered, "decreased request rate");
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.state();
        let now = Instant::now();
        let requests_last_minute = state
            .history
            .iter()
            .filter(|t| now.saturating_duration_since(**t) <= Duration::from_secs(60))
            .count();
        LimiterStats {
            rate: self.bucket.rate(),
            tokens: self.bucket.tokens(),
            capacity: self.bucket.capacity(),
            requests_last_minute,
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
            total_retries: state.total_retries,
        }
    }

    /// Restore the initial rate, a full bucket and zeroed counters.
    pub fn reset(&self) {
        *self.state() = AdaptState::default();
        self.bucket.reset(self.config.tokens_per_second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Copy)]
    struct Status(u16);

    impl LimitedResponse for Status {
        fn verdict(&self) -> Verdict {
            match self.0 {
                200..=299 => Verdict::Accepted,
                429 => Verdict::RateLimited { retry_after: None },
                _ => Verdict::Rejected,
            }
        }

        fn status(&self) -> u16 {
            self.0
        }

        fn error_message(&self) -> String {
            format!("status {}", self.0)
        }
    }

    fn fast_config() -> LimiterConfig {
        LimiterConfig {
            tokens_per_second: 1.0,
            max_tokens: 100,
            base_backoff_ms: 1000,
            max_backoff_ms: 8000,
            jitter_factor: 0.0,
            max_retries: 3,
            ..LimiterConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        let limiter = AdaptiveLimiter::new(fast_config());
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let response = limiter
            .execute_with_retry("page 1", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, TransportError>(Status(if n == 0 { 429 } else { 200 })) }
            })
            .await
            .unwrap();

        assert_eq!(response.0, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(limiter.stats().total_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_immediate() {
        let limiter = AdaptiveLimiter::new(fast_config());
        let calls = AtomicU32::new(0);

        let err = limiter
            .execute_with_retry("page 1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TransportError>(Status(401)) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LimitError::Rejected { status: 401, attempt: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let limiter = AdaptiveLimiter::new(fast_config());
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let err = limiter
            .execute_with_retry("page 4", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TransportError>(Status(429)) }
            })
            .await
            .unwrap_err();

        assert!(matches!(&err, LimitError::Exhausted { attempts: 3, last_error: None, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff; no sleep after the final attempt.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retried() {
        let limiter = AdaptiveLimiter::new(fast_config());
        let calls = AtomicU32::new(0);

        let err = limiter
            .execute_with_retry("page 1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Status, _>(TransportError::Network("connection reset".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LimitError::Exhausted { last_error: Some(TransportError::Network(_)), .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_preferred() {
        #[derive(Debug)]
        struct Throttled(bool);

        impl LimitedResponse for Throttled {
            fn verdict(&self) -> Verdict {
                if self.0 {
                    Verdict::RateLimited { retry_after: Some(Duration::from_secs(7)) }
                } else {
                    Verdict::Accepted
                }
            }

            fn status(&self) -> u16 {
                if self.0 { 429 } else { 200 }
            }

            fn error_message(&self) -> String {
                String::new()
            }
        }

        let limiter = AdaptiveLimiter::new(fast_config());
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        limiter
            .execute_with_retry("page 1", || {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                async move { Ok::<_, TransportError>(Throttled(first)) }
            })
            .await
            .unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8), "waited {waited:?}");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let limiter = AdaptiveLimiter::new(fast_config());
        assert_eq!(limiter.backoff(0), Duration::from_secs(1));
        assert_eq!(limiter.backoff(1), Duration::from_secs(2));
        assert_eq!(limiter.backoff(2), Duration::from_secs(4));
        assert_eq!(limiter.backoff(10), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let limiter = AdaptiveLimiter::new(LimiterConfig { jitter_factor: 0.1, ..fast_config() });
        for _ in 0..100 {
            let wait = limiter.backoff(0);
            assert!(wait >= Duration::from_millis(900) && wait <= Duration::from_millis(1100), "{wait:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successes_raise_rate_to_ceiling() {
        let config = LimiterConfig {
            tokens_per_second: 0.5,
            max_rate: 0.6,
            success_threshold: 2,
            increase_factor: 1.5,
            ..fast_config()
        };
        let limiter = AdaptiveLimiter::new(config);
        for _ in 0..4 {
            limiter
                .execute_with_retry("ok", || async { Ok::<_, TransportError>(Status(200)) })
                .await
                .unwrap();
        }
        assert_eq!(limiter.stats().rate, 0.6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_lower_rate_to_floor() {
        let config = LimiterConfig {
            tokens_per_second: 0.4,
            min_rate: 0.1,
            failure_threshold: 1,
            decrease_factor: 0.5,
            max_retries: 4,
            ..fast_config()
        };
        let limiter = AdaptiveLimiter::new(config);
        let _ = limiter
            .execute_with_retry("throttled", || async { Ok::<_, TransportError>(Status(429)) })
            .await;
        assert_eq!(limiter.stats().rate, 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_adaptive_keeps_rate() {
        let config = LimiterConfig { adaptive: false, failure_threshold: 1, ..fast_config() };
        let limiter = AdaptiveLimiter::new(config);
        let _ = limiter
            .execute_with_retry("throttled", || async { Ok::<_, TransportError>(Status(429)) })
            .await;
        assert_eq!(limiter.stats().rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_reset() {
        let limiter = AdaptiveLimiter::new(fast_config());
        limiter
            .execute_with_retry("ok", || async { Ok::<_, TransportError>(Status(200)) })
            .await
            .unwrap();

        let stats = limiter.stats();
        assert_eq!(stats.requests_last_minute, 1);
        assert_eq!(stats.consecutive_successes, 1);
        assert_eq!(stats.capacity, 100.0);

        limiter.reset();
        let stats = limiter.stats();
        assert_eq!(stats.requests_last_minute, 0);
        assert_eq!(stats.consecutive_successes, 0);
        assert_eq!(stats.tokens, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_still_grants_one_token() {
        let limiter = AdaptiveLimiter::new(LimiterConfig { max_tokens: 0, ..fast_config() });
        assert_eq!(limiter.stats().capacity, 1.0);
        let start = Instant::now();

        for _ in 0..2 {
            limiter
                .execute_with_retry("ok", || async { Ok::<_, TransportError>(Status(200)) })
                .await
                .unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
