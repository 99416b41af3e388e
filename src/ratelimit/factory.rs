//! Construction of named limiters from configuration records.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::limiter::RateLimiter;
use crate::config::{LimiterConfig, LimitersConfig};
use crate::error::{LimiterError, Result};

/// Builds limiters from already-parsed configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterFactory {
    clock: Arc<dyn Clock>,
}

impl RateLimiterFactory {
    /// A factory whose limiters use the system clock.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// A factory whose limiters share `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Build one named limiter.
    pub fn create(&self, name: &str, config: &LimiterConfig) -> Result<RateLimiter> {
        RateLimiter::with_name(name, config.clone(), self.clock.clone())
    }

    /// Build every limiter in `configs`.
    ///
    /// All-or-nothing: the first invalid entry aborts the whole set, and the
    /// error names it.
    pub fn create_from_named_configs(&self, configs: &LimitersConfig) -> Result<LimiterRegistry> {
        let mut limiters = BTreeMap::new();
        for (name, config) in &configs.limiters {
            let limiter = self.create(name, config).map_err(|e| match e {
                LimiterError::Configuration(msg) => {
                    LimiterError::Configuration(format!("limiter '{}': {}", name, msg))
                }
                other => other,
            })?;
            limiters.insert(name.clone(), Arc::new(limiter));
        }

        info!(count = limiters.len(), "Rate limiters created");
        Ok(LimiterRegistry { limiters })
    }
}

impl Default for RateLimiterFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Named limiters produced by the factory.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    limiters: BTreeMap<String, Arc<RateLimiter>>,
}

impl LimiterRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<RateLimiter>)> {
        self.limiters.iter().map(|(name, limiter)| (name.as_str(), limiter))
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Stop every limiter's janitor.
    pub async fn shutdown(&self) {
        for limiter in self.limiters.values() {
            limiter.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn factory() -> RateLimiterFactory {
        RateLimiterFactory::with_clock(Arc::new(ManualClock::starting_at_secs(1_700_000_000)))
    }

    #[tokio::test]
    async fn test_create_named_limiter() {
        let limiter = factory()
            .create("uploads", &LimiterConfig::sliding_window(2, 60.0))
            .unwrap();
        assert_eq!(limiter.name(), "uploads");
        assert_eq!(limiter.algorithm_name(), "sliding_window");
        assert_eq!(limiter.current_config(), &LimiterConfig::sliding_window(2, 60.0));
    }

    #[tokio::test]
    async fn test_create_from_yaml() {
        let yaml = r#"
api:
  algorithm: token_bucket
  capacity: 3
  refill_rate: 1.5
login:
  algorithm: sliding_window
  limit: 5
  window_size: 300
pages:
  algorithm: fixed_window
  limit: 100
  window_size: 60
  sliding_approximation: true
"#;
        let configs = LimitersConfig::from_yaml(yaml).unwrap();
        let registry = factory().create_from_named_configs(&configs).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["api", "login", "pages"]);

        let api = registry.get("api").unwrap();
        assert_eq!(api.name(), "api");
        assert_eq!(api.algorithm_name(), "token_bucket");
        for (name, limiter) in registry.iter() {
            assert_eq!(limiter.current_config(), configs.get(name).unwrap());
        }
        assert!(registry.get("missing").is_none());

        registry.shutdown().await;
        assert!(registry.iter().all(|(_, limiter)| !limiter.janitor_running()));
    }

    #[tokio::test]
    async fn test_invalid_entry_aborts_all() {
        let mut configs = LimitersConfig::new();
        configs.insert("good", LimiterConfig::token_bucket(5, 1.0));
        configs.insert("bad", LimiterConfig::fixed_window(0, 10.0, false));

        let err = factory().create_from_named_configs(&configs).unwrap_err();
        match err {
            LimiterError::Configuration(msg) => assert!(msg.contains("'bad'"), "{}", msg),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_limiters_share_clock_but_not_state() {
        let registry = factory()
            .create_from_named_configs(&{
                let mut configs = LimitersConfig::new();
                configs.insert("a", LimiterConfig::token_bucket(1, 1.0));
                configs.insert("b", LimiterConfig::token_bucket(1, 1.0));
                configs
            })
            .unwrap();

        let a = registry.get("a").unwrap();
        let b = registry.get("b").unwrap();
        assert!(a.is_allowed("same-client"));
        assert!(!a.is_allowed("same-client"));
        assert!(b.is_allowed("same-client"));
    }
}
