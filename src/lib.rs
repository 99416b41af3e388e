//! Sentinel Limit - in-process rate limiting engine
//!
//! This crate admits or denies operations per client identifier under one of
//! three quota strategies: token bucket, sliding window log, and fixed window
//! with optional sliding approximation. Client state is spread across
//! sharded locks, and a background janitor evicts clients that have been
//! idle longer than a TTL so memory stays bounded.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::{AlgorithmConfig, LimiterConfig, LimitersConfig};
pub use error::{LimiterError, RateLimitExceeded, Result};
pub use ratelimit::{
    Guarded, LimiterRegistry, Permit, RateLimitResult, RateLimiter, RateLimiterFactory,
};
