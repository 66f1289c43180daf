use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Rate limit applied to a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum burst size in tokens (default: 50)
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Sustained refill rate in tokens per second (default: 25)
    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,
}

fn default_capacity() -> u32 {
    50
}

fn default_refill_per_second() -> f64 {
    25.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { capacity: default_capacity(), refill_per_second: default_refill_per_second() }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// Starts full. Refill is computed lazily from elapsed time on every call, so no background
/// timer is needed and the token count never exceeds capacity.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_second: f64,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
            capacity,
            refill_per_second,
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_second)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let tokens_to_add = elapsed.as_secs_f64() * self.refill_per_second;

        if tokens_to_add > 0.0 {
            state.tokens = (state.tokens + tokens_to_add).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Debits `n` tokens if available.
    ///
    /// Returns `false` and leaves the bucket unchanged (apart from refill) when fewer than `n`
    /// tokens are available.
    pub fn try_consume(&self, n: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());

        let wanted = f64::from(n);
        if state.tokens >= wanted {
            state.tokens -= wanted;
            true
        } else {
            false
        }
    }

    /// Returns `n` tokens previously consumed, capped at capacity.
    ///
    /// Used when a token was taken for a dispatch that never reached the endpoint.
    pub fn refund(&self, n: u32) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + f64::from(n)).min(self.capacity);
    }

    /// Tokens currently available, after lazy refill.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    #[must_use]
    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }
}
