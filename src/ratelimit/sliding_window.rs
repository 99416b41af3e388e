//! Sliding window log decision function.
//!
//! Every admitted call is recorded; a call is admitted only while fewer than
//! `limit` records lie within the trailing window. Exact, with memory
//! proportional to the admissions inside one window.

use std::collections::VecDeque;
use std::time::Duration;

use super::algorithm::Algorithm;
use super::clock::Timestamp;
use super::result::RateLimitResult;
use crate::error::{LimiterError, Result};

/// Per-client log of admitted calls (monotonic times, non-decreasing).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlidingWindowState {
    pub timestamps: VecDeque<Duration>,
}

/// Sliding window log limiter parameters.
#[derive(Debug, Clone)]
pub struct SlidingWindowLog {
    limit: u64,
    window: Duration,
}

impl SlidingWindowLog {
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(LimiterError::config("limit must be greater than 0"));
        }
        if window.is_zero() {
            return Err(LimiterError::config("window_size must be greater than 0"));
        }
        Ok(Self { limit, window })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop records that have left the window ending at `now`.
    fn prune(&self, state: &mut SlidingWindowState, now: Duration) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(&oldest) = state.timestamps.front() {
            if oldest > cutoff {
                break;
            }
            state.timestamps.pop_front();
        }
    }
}

impl Algorithm for SlidingWindowLog {
    type State = SlidingWindowState;

    const NAME: &'static str = "sliding_window";

    fn new_state(&self, _now: Timestamp) -> SlidingWindowState {
        SlidingWindowState::default()
    }

    fn decide(&self, state: &mut SlidingWindowState, now: Timestamp) -> RateLimitResult {
        self.prune(state, now.monotonic);

        let allowed = (state.timestamps.len() as u64) < self.limit;
        if allowed {
            // Keep the log sorted even if the clock stalls or steps back.
            let last = state.timestamps.back().copied().unwrap_or_default();
            state.timestamps.push_back(now.monotonic.max(last));
        }

        let remaining = self.limit.saturating_sub(state.timestamps.len() as u64);
        let until_oldest_expires = state
            .timestamps
            .front()
            .map(|oldest| oldest.saturating_add(self.window).saturating_sub(now.monotonic))
            .unwrap_or_default();
        let retry_after = if allowed {
            Duration::ZERO
        } else {
            until_oldest_expires
        };

        RateLimitResult {
            allowed,
            remaining,
            limit: self.limit,
            reset_at: now.system_time_after(until_oldest_expires),
            retry_after,
        }
    }

    fn limit(&self) -> u64 {
        self.limit
    }
}
