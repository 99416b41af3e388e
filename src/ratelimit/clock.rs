//! Time sources for rate limit decisions.

use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A point in time as seen by a limiter.
///
/// `monotonic` is measured from an arbitrary per-clock origin and never moves
/// backwards. `unix` is the same instant expressed as an offset from the Unix
/// epoch and is used for epoch-aligned windows and reset timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub monotonic: Duration,
    pub unix: Duration,
}

/// Latest reset instant reported: 9999-12-31T23:59:59Z.
///
/// Representable as a `SystemTime` on every supported platform.
const MAX_UNIX_OFFSET: Duration = Duration::from_secs(253_402_300_799);

impl Timestamp {
    /// Wall-clock instant `offset` after this timestamp, saturating at
    /// [`MAX_UNIX_OFFSET`].
    pub fn system_time_after(&self, offset: Duration) -> SystemTime {
        unix_time(self.unix.saturating_add(offset))
    }
}

/// The wall-clock instant `offset` after the Unix epoch, saturating at
/// [`MAX_UNIX_OFFSET`].
pub(crate) fn unix_time(offset: Duration) -> SystemTime {
    UNIX_EPOCH + offset.min(MAX_UNIX_OFFSET)
}

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// The real clock.
///
/// Epoch time is derived from an anchor taken at construction plus the
/// monotonic time elapsed since, so it moves forward with the monotonic clock
/// even if the system wall clock is stepped.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
    origin_unix: Duration,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let monotonic = self.origin.elapsed();
        Timestamp {
            monotonic,
            unix: self.origin_unix + monotonic,
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock whose epoch time starts at `unix_start`.
    pub fn new(unix_start: Duration) -> Self {
        Self {
            now: Mutex::new(Timestamp {
                monotonic: Duration::ZERO,
                unix: unix_start,
            }),
        }
    }

    /// Create a clock starting at `secs` seconds after the Unix epoch.
    pub fn starting_at_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        now.monotonic += by;
        now.unix += by;
    }

    /// Move the clock forward by a float number of seconds.
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_both_axes() {
        let clock = ManualClock::starting_at_secs(1_000);
        assert_eq!(clock.now().monotonic, Duration::ZERO);
        assert_eq!(clock.now().unix, Duration::from_secs(1_000));

        clock.advance(Duration::from_millis(1500));
        let now = clock.now();
        assert_eq!(now.monotonic, Duration::from_millis(1500));
        assert_eq!(now.unix, Duration::from_millis(1_001_500));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b.monotonic >= a.monotonic);
        assert!(b.unix >= a.unix);
        assert!(a.unix > Duration::from_secs(1_600_000_000));
    }

    #[test]
    fn test_system_time_after() {
        let ts = Timestamp {
            monotonic: Duration::ZERO,
            unix: Duration::from_secs(10),
        };
        assert_eq!(
            ts.system_time_after(Duration::from_secs(5)),
            UNIX_EPOCH + Duration::from_secs(15)
        );
    }

    #[test]
    fn test_system_time_after_saturates() {
        let ts = Timestamp {
            monotonic: Duration::ZERO,
            unix: Duration::from_secs(1_700_000_000),
        };
        let far = UNIX_EPOCH + MAX_UNIX_OFFSET;
        assert_eq!(ts.system_time_after(Duration::MAX), far);
        assert_eq!(ts.system_time_after(Duration::from_secs_f64(1e19)), far);
        assert_eq!(unix_time(Duration::MAX), far);
    }
}
