//! Token bucket pacing every outbound request.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Longest single sleep; waits are split so a cancelled caller stops promptly.
pub(crate) const MAX_SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Sleep for `total` in slices of at most [`MAX_SLEEP_SLICE`].
pub(crate) async fn sleep_in_slices(total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() {
        let slice = remaining.min(MAX_SLEEP_SLICE);
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(slice);
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(capacity);
        self.last_refill = now;
    }

    /// Tokens available at `now` without mutating.
    fn projected(&self, capacity: f64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.rate).min(capacity)
    }
}

/// Continuous-refill token bucket.
///
/// Invariant: `0 <= tokens <= capacity`. The lock guards only state
/// transitions; waiting happens outside it.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
}

impl TokenBucket {
    /// A full bucket refilling at `rate` tokens per second.
    pub fn new(rate: f64, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self { state: Mutex::new(BucketState { tokens: capacity, rate, last_refill: Instant::now() }), capacity }
    }

    fn state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take `n` tokens.
    ///
    /// Non-blocking calls return `false` at once when short. Blocking calls
    /// wait for the deficit to refill and retry. A request larger than the
    /// capacity can never be met and is refused either way.
    pub async fn consume(&self, n: u32, blocking: bool) -> bool {
        let needed = f64::from(n);
        if needed > self.capacity {
            tracing::warn!(requested = n, capacity = self.capacity, "token request exceeds bucket capacity");
            return false;
        }

        loop {
            let wait = {
                let mut state = self.state();
                state.refill(self.capacity, Instant::now());
                if state.tokens >= needed {
                    state.tokens -= needed;
                    return true;
                }
                if !blocking {
                    return false;
                }
                secs((needed - state.tokens) / state.rate)
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for tokens");
            tokio::time::sleep(wait.min(MAX_SLEEP_SLICE)).await;
        }
    }

    /// How long until `n` tokens would be available; zero if they already are.
    pub fn get_wait_time(&self, n: u32) -> Duration {
        let state = self.state();
        let available = state.projected(self.capacity, Instant::now());
        let needed = f64::from(n);
        if available >= needed { Duration::ZERO } else { secs((needed - available) / state.rate) }
    }

    /// Change the refill rate, crediting tokens earned at the old rate first.
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.state();
        state.refill(self.capacity, Instant::now());
        state.rate = rate;
    }

    pub fn rate(&self) -> f64 {
        self.state().rate
    }

    /// Tokens available now.
    pub fn tokens(&self) -> f64 {
        self.state().projected(self.capacity, Instant::now())
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill completely and switch to `rate`.
    pub fn reset(&self, rate: f64) {
        let mut state = self.state();
        state.tokens = self.capacity;
        state.rate = rate;
        state.last_refill = Instant::now();
    }
}
