//! Fixed window counter decision function.
//!
//! Time is cut into epoch-aligned windows of `window_size`, so every client
//! shares the same boundaries. A plain fixed window can admit up to twice the
//! limit across a boundary. The optional sliding approximation weights the
//! previous window's count by how much of it still overlaps a trailing
//! window; this smooths the boundary but is a heuristic, not an exact bound.

use std::time::Duration;

use super::algorithm::Algorithm;
use super::clock::{unix_time, Timestamp};
use super::result::RateLimitResult;
use crate::error::{LimiterError, Result};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Per-client window counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindowState {
    /// Start of the current window, as an offset from the Unix epoch
    pub window_start: Duration,
    /// Admissions in the current window
    pub count: u64,
    /// Admissions in the immediately preceding window
    pub prev_count: u64,
}

/// Fixed window limiter parameters.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    limit: u64,
    window: Duration,
    sliding_approximation: bool,
}

impl FixedWindow {
    pub fn new(limit: u64, window: Duration, sliding_approximation: bool) -> Result<Self> {
        if limit == 0 {
            return Err(LimiterError::config("limit must be greater than 0"));
        }
        if window.is_zero() {
            return Err(LimiterError::config("window_size must be greater than 0"));
        }
        Ok(Self {
            limit,
            window,
            sliding_approximation,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn sliding_approximation(&self) -> bool {
        self.sliding_approximation
    }

    /// The window boundary at or before `unix`.
    pub fn window_start_for(&self, unix: Duration) -> Duration {
        let window = self.window.as_nanos();
        let aligned = (unix.as_nanos() / window) * window;
        Duration::new(
            (aligned / NANOS_PER_SEC) as u64,
            (aligned % NANOS_PER_SEC) as u32,
        )
    }

    /// Advance `state` to the window containing `unix`.
    ///
    /// The previous count is carried only when exactly one window has
    /// passed; after a longer gap it is zero. A boundary earlier than the
    /// stored one is ignored.
    fn roll(&self, state: &mut FixedWindowState, unix: Duration) {
        let start = self.window_start_for(unix);
        if start <= state.window_start {
            return;
        }
        state.prev_count = if start - state.window_start == self.window {
            state.count
        } else {
            0
        };
        state.count = 0;
        state.window_start = start;
    }

    /// The count a decision at `unix` is compared against.
    pub fn effective_count(&self, state: &FixedWindowState, unix: Duration) -> f64 {
        if !self.sliding_approximation {
            return state.count as f64;
        }
        let into_window = unix.saturating_sub(state.window_start).as_secs_f64();
        let ratio = (into_window / self.window.as_secs_f64()).clamp(0.0, 1.0);
        state.prev_count as f64 * (1.0 - ratio) + state.count as f64
    }
}

impl Algorithm for FixedWindow {
    type State = FixedWindowState;

    const NAME: &'static str = "fixed_window";

    fn new_state(&self, now: Timestamp) -> FixedWindowState {
        FixedWindowState {
            window_start: self.window_start_for(now.unix),
            count: 0,
            prev_count: 0,
        }
    }

    fn decide(&self, state: &mut FixedWindowState, now: Timestamp) -> RateLimitResult {
        self.roll(state, now.unix);

        let effective = self.effective_count(state, now.unix);
        let limit = self.limit as f64;
        let allowed = effective < limit;
        if allowed {
            state.count += 1;
        }

        let remaining = if allowed {
            (limit - effective - 1.0).max(0.0).floor() as u64
        } else {
            0
        };
        let window_end = state.window_start.saturating_add(self.window);
        let retry_after = if allowed {
            Duration::ZERO
        } else {
            window_end.saturating_sub(now.unix)
        };

        RateLimitResult {
            allowed,
            remaining,
            limit: self.limit,
            reset_at: unix_time(window_end),
            retry_after,
        }
    }

    fn limit(&self) -> u64 {
        self.limit
    }
}
