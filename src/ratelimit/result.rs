//! The outcome of a single admission decision.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Outcome of one `try_acquire` call.
///
/// When `allowed` is false, either `retry_after` is non-zero or `remaining`
/// is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the call was admitted
    pub allowed: bool,
    /// Admissions still available right now
    pub remaining: u64,
    /// The configured quota (capacity or per-window limit)
    pub limit: u64,
    /// When the quota next frees up
    pub reset_at: SystemTime,
    /// How long a denied caller should wait before retrying
    pub retry_after: Duration,
}

impl RateLimitResult {
    /// Seconds since the Unix epoch at which the quota frees up, rounded up.
    pub fn reset_at_unix_secs(&self) -> u64 {
        let since = self.reset_at.duration_since(UNIX_EPOCH).unwrap_or_default();
        if since.subsec_nanos() > 0 {
            since.as_secs() + 1
        } else {
            since.as_secs()
        }
    }

    /// Conventional HTTP rate limit headers for this decision.
    ///
    /// `Retry-After` is only present on denial and is rounded up to whole
    /// seconds.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at_unix_secs().to_string()),
        ];
        if !self.allowed {
            let secs = self.retry_after.as_secs_f64().ceil().max(1.0) as u64;
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(allowed: bool, retry_after: Duration) -> RateLimitResult {
        RateLimitResult {
            allowed,
            remaining: if allowed { 4 } else { 0 },
            limit: 5,
            reset_at: UNIX_EPOCH + Duration::from_millis(10_250),
            retry_after,
        }
    }

    #[test]
    fn test_reset_rounds_up() {
        assert_eq!(result(true, Duration::ZERO).reset_at_unix_secs(), 11);
    }

    #[test]
    fn test_headers_when_allowed() {
        let headers = result(true, Duration::ZERO).headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], ("X-RateLimit-Limit", "5".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "4".to_string()));
        assert_eq!(headers[2], ("X-RateLimit-Reset", "11".to_string()));
    }

    #[test]
    fn test_headers_when_denied() {
        let headers = result(false, Duration::from_millis(1200)).headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], ("Retry-After", "2".to_string()));
    }
}
