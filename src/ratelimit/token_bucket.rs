//! Token bucket decision function.

use std::time::Duration;

use super::algorithm::Algorithm;
use super::clock::Timestamp;
use super::result::RateLimitResult;
use crate::error::{LimiterError, Result};

/// Per-client bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketState {
    /// Always within `[0, capacity]`
    pub tokens: f64,
    /// Monotonic time of the last refill
    pub last_update: Duration,
}

/// Token bucket: `capacity` tokens accrue at `refill_rate` per second, one is
/// spent per admitted call.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Create a token bucket, rejecting non-positive parameters.
    pub fn new(capacity: u64, refill_rate: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(LimiterError::config("capacity must be greater than 0"));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(LimiterError::config(format!(
                "refill_rate must be a positive finite number, got {}",
                refill_rate
            )));
        }
        Ok(Self {
            capacity,
            refill_rate,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

impl Algorithm for TokenBucket {
    type State = TokenBucketState;

    const NAME: &'static str = "token_bucket";

    fn new_state(&self, now: Timestamp) -> TokenBucketState {
        TokenBucketState {
            tokens: self.capacity as f64,
            last_update: now.monotonic,
        }
    }

    fn decide(&self, state: &mut TokenBucketState, now: Timestamp) -> RateLimitResult {
        let capacity = self.capacity as f64;
        let elapsed = now.monotonic.saturating_sub(state.last_update);

        let refilled = state.tokens + elapsed.as_secs_f64() * self.refill_rate;
        state.tokens = refilled.clamp(0.0, capacity);
        state.last_update = state.last_update.max(now.monotonic);

        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
        }

        let retry_after = if allowed {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((1.0 - state.tokens) / self.refill_rate)
                .unwrap_or(Duration::MAX)
        };

        RateLimitResult {
            allowed,
            remaining: state.tokens.floor() as u64,
            limit: self.capacity,
            reset_at: now.system_time_after(retry_after),
            retry_after,
        }
    }

    fn limit(&self) -> u64 {
        self.capacity
    }
}
