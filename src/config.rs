//! Configuration records for rate limiters.
//!
//! A [`LimiterConfig`] is the already-parsed description of one limiter: the
//! algorithm tag with its parameters plus the sharding and expiry settings.
//! [`LimitersConfig`] is a named collection of them, loadable from YAML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimiterError, Result};

/// Default number of lock shards per limiter.
pub const DEFAULT_SHARD_COUNT: usize = 1024;
/// Default idle time (seconds) before a client's state may be evicted.
pub const DEFAULT_TTL_SECS: f64 = 3600.0;

/// Algorithm tag and its parameters.
///
/// Keys other than the tag, the algorithm's own parameters, `shard_count`
/// and `ttl` are rejected, so a misspelt option fails to load instead of
/// silently taking its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case", deny_unknown_fields)]
pub enum AlgorithmConfig {
    /// Token bucket: `capacity` tokens, refilled at `refill_rate` tokens/second.
    TokenBucket { capacity: u64, refill_rate: f64 },
    /// Sliding window log: at most `limit` admissions in any trailing
    /// `window_size` seconds.
    SlidingWindow { limit: u64, window_size: f64 },
    /// Fixed window: at most `limit` admissions per epoch-aligned window of
    /// `window_size` seconds.
    FixedWindow {
        limit: u64,
        window_size: f64,
        /// Blend the previous window's count into the current one.
        #[serde(default)]
        sliding_approximation: bool,
    },
}

impl AlgorithmConfig {
    /// The configuration tag of this algorithm.
    pub fn tag(&self) -> &'static str {
        match self {
            AlgorithmConfig::TokenBucket { .. } => "token_bucket",
            AlgorithmConfig::SlidingWindow { .. } => "sliding_window",
            AlgorithmConfig::FixedWindow { .. } => "fixed_window",
        }
    }
}

/// Configuration for a single rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Algorithm and its parameters
    #[serde(flatten)]
    pub algorithm: AlgorithmConfig,

    /// Number of lock shards client ids are spread across
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Idle seconds after which client state is evicted
    #[serde(default = "default_ttl")]
    pub ttl: f64,
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

fn default_ttl() -> f64 {
    DEFAULT_TTL_SECS
}

impl LimiterConfig {
    /// Token bucket configuration with default sharding and TTL.
    pub fn token_bucket(capacity: u64, refill_rate: f64) -> Self {
        Self::with_algorithm(AlgorithmConfig::TokenBucket {
            capacity,
            refill_rate,
        })
    }

    /// Sliding window log configuration with default sharding and TTL.
    pub fn sliding_window(limit: u64, window_size: f64) -> Self {
        Self::with_algorithm(AlgorithmConfig::SlidingWindow { limit, window_size })
    }

    /// Fixed window configuration with default sharding and TTL.
    pub fn fixed_window(limit: u64, window_size: f64, sliding_approximation: bool) -> Self {
        Self::with_algorithm(AlgorithmConfig::FixedWindow {
            limit,
            window_size,
            sliding_approximation,
        })
    }

    fn with_algorithm(algorithm: AlgorithmConfig) -> Self {
        Self {
            algorithm,
            shard_count: DEFAULT_SHARD_COUNT,
            ttl: DEFAULT_TTL_SECS,
        }
    }

    /// Override the shard count.
    pub fn shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Override the TTL (seconds).
    pub fn ttl(mut self, ttl: f64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Check every numeric precondition.
    pub fn validate(&self) -> Result<()> {
        match &self.algorithm {
            AlgorithmConfig::TokenBucket {
                capacity,
                refill_rate,
            } => {
                if *capacity == 0 {
                    return Err(LimiterError::config("capacity must be greater than 0"));
                }
                positive_finite("refill_rate", *refill_rate)?;
            }
            AlgorithmConfig::SlidingWindow { limit, window_size }
            | AlgorithmConfig::FixedWindow {
                limit, window_size, ..
            } => {
                if *limit == 0 {
                    return Err(LimiterError::config("limit must be greater than 0"));
                }
                positive_secs("window_size", *window_size)?;
            }
        }

        if self.shard_count == 0 {
            return Err(LimiterError::config("shard_count must be greater than 0"));
        }
        positive_secs("ttl", self.ttl)?;
        Ok(())
    }

    /// The TTL as a duration. Only meaningful after [`validate`](Self::validate).
    pub(crate) fn ttl_duration(&self) -> Result<Duration> {
        positive_secs("ttl", self.ttl)
    }
}

fn positive_finite(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LimiterError::config(format!(
            "{} must be a positive finite number, got {}",
            field, value
        )));
    }
    Ok(value)
}

/// Convert a float number of seconds into a strictly positive duration.
pub(crate) fn positive_secs(field: &str, secs: f64) -> Result<Duration> {
    let secs = positive_finite(field, secs)?;
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|e| LimiterError::config(format!("{} is out of range: {}", field, e)))?;
    if duration.is_zero() {
        return Err(LimiterError::config(format!(
            "{} is below clock resolution: {}",
            field, secs
        )));
    }
    Ok(duration)
}

/// A named collection of limiter configurations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitersConfig {
    /// Map of limiter name to its configuration
    pub limiters: BTreeMap<String, LimiterConfig>,
}

impl LimitersConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named limiter configuration.
    pub fn insert(&mut self, name: impl Into<String>, config: LimiterConfig) {
        self.limiters.insert(name.into(), config);
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            LimiterError::config(format!("Failed to parse limiter config: {}", e))
        })
    }

    /// Get the configuration for a named limiter.
    pub fn get(&self, name: &str) -> Option<&LimiterConfig> {
        self.limiters.get(name)
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
