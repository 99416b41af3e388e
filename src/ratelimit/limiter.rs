//! Rate limiter façade.
//!
//! A [`RateLimiter`] owns one algorithm's client state store, the shard locks
//! guarding it, the last-access map, and the janitor task that expires idle
//! clients. The algorithm is chosen once at construction.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::algorithm::Algorithm;
use super::clock::{Clock, SystemClock};
use super::fixed_window::FixedWindow;
use super::janitor::{sweep_interval, Janitor, Sweep};
use super::result::RateLimitResult;
use super::shard::{ShardedStore, SweepReport};
use super::sliding_window::SlidingWindowLog;
use super::token_bucket::TokenBucket;
use crate::config::{positive_secs, AlgorithmConfig, LimiterConfig};
use crate::error::{RateLimitExceeded, Result};

/// One algorithm bound to its state store.
pub(crate) struct LimiterCore<A: Algorithm> {
    algorithm: A,
    store: ShardedStore<A::State>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<A: Algorithm> LimiterCore<A> {
    fn new(algorithm: A, shard_count: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            algorithm,
            store: ShardedStore::new(shard_count),
            clock,
            ttl,
        }
    }

    fn try_acquire(&self, client_id: &str) -> RateLimitResult {
        let now = self.clock.now();
        let result = self.store.with_state(
            client_id,
            now.monotonic,
            || self.algorithm.new_state(now),
            |state| self.algorithm.decide(state, now),
        );

        if result.allowed {
            trace!(
                client_id = %client_id,
                algorithm = A::NAME,
                remaining = result.remaining,
                "Request admitted"
            );
        } else {
            debug!(
                client_id = %client_id,
                algorithm = A::NAME,
                retry_after_ms = result.retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
        }

        result
    }
}

impl<A: Algorithm> Sweep for LimiterCore<A> {
    fn sweep(&self) -> SweepReport {
        self.store
            .evict_expired(self.ttl, || self.clock.now().monotonic)
    }
}

enum Engine {
    TokenBucket(Arc<LimiterCore<TokenBucket>>),
    SlidingWindow(Arc<LimiterCore<SlidingWindowLog>>),
    FixedWindow(Arc<LimiterCore<FixedWindow>>),
}

/// Dispatch a method call to whichever core the engine holds.
macro_rules! with_core {
    ($engine:expr, $core:ident => $body:expr) => {
        match $engine {
            Engine::TokenBucket($core) => $body,
            Engine::SlidingWindow($core) => $body,
            Engine::FixedWindow($core) => $body,
        }
    };
}

/// A rate limiter for one algorithm configuration.
///
/// Decisions for the same client id are serialized by that client's shard
/// lock; decisions for different ids proceed in parallel. Constructing a
/// limiter starts its janitor: as a task on the current Tokio runtime when
/// there is one, otherwise on a dedicated thread. The janitor runs until
/// [`shutdown`](RateLimiter::shutdown) or until the limiter is dropped.
pub struct RateLimiter {
    name: String,
    config: LimiterConfig,
    engine: Engine,
    janitor: Janitor,
}

impl RateLimiter {
    /// Create a limiter backed by the system clock.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a limiter reading time from `clock`, named after its algorithm.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let name = config.algorithm.tag();
        Self::with_name(name, config, clock)
    }

    /// Create a limiter called `name`, reading time from `clock`.
    ///
    /// The name appears in denial errors and in every log line of the limiter
    /// and its janitor.
    pub fn with_name(
        name: impl Into<String>,
        config: LimiterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        config.validate()?;
        let ttl = config.ttl_duration()?;
        let shards = config.shard_count;

        let (engine, target): (Engine, Arc<dyn Sweep>) = match &config.algorithm {
            AlgorithmConfig::TokenBucket {
                capacity,
                refill_rate,
            } => {
                let core = Arc::new(LimiterCore::new(
                    TokenBucket::new(*capacity, *refill_rate)?,
                    shards,
                    ttl,
                    clock,
                ));
                let target: Arc<dyn Sweep> = core.clone();
                (Engine::TokenBucket(core), target)
            }
            AlgorithmConfig::SlidingWindow { limit, window_size } => {
                let window = positive_secs("window_size", *window_size)?;
                let core = Arc::new(LimiterCore::new(
                    SlidingWindowLog::new(*limit, window)?,
                    shards,
                    ttl,
                    clock,
                ));
                let target: Arc<dyn Sweep> = core.clone();
                (Engine::SlidingWindow(core), target)
            }
            AlgorithmConfig::FixedWindow {
                limit,
                window_size,
                sliding_approximation,
            } => {
                let window = positive_secs("window_size", *window_size)?;
                let core = Arc::new(LimiterCore::new(
                    FixedWindow::new(*limit, window, *sliding_approximation)?,
                    shards,
                    ttl,
                    clock,
                ));
                let target: Arc<dyn Sweep> = core.clone();
                (Engine::FixedWindow(core), target)
            }
        };

        let janitor = Janitor::spawn(Arc::downgrade(&target), sweep_interval(ttl), name.clone())?;

        info!(
            limiter = %name,
            algorithm = config.algorithm.tag(),
            shard_count = shards,
            ttl_secs = config.ttl,
            "Rate limiter initialized"
        );

        Ok(Self {
            name,
            config,
            engine,
            janitor,
        })
    }

    /// Decide whether one call for `client_id` is admitted.
    ///
    /// A denial is reported in the result, never as an error.
    pub fn try_acquire(&self, client_id: &str) -> RateLimitResult {
        with_core!(&self.engine, core => core.try_acquire(client_id))
    }

    /// Whether one call for `client_id` is admitted.
    pub fn is_allowed(&self, client_id: &str) -> bool {
        self.try_acquire(client_id).allowed
    }

    /// Acquire a permit, turning a denial into [`RateLimitExceeded`].
    pub fn acquire(&self, client_id: &str) -> std::result::Result<Permit, RateLimitExceeded> {
        let result = self.try_acquire(client_id);
        if result.allowed {
            Ok(Permit {
                client_id: client_id.to_string(),
                result,
            })
        } else {
            Err(RateLimitExceeded {
                result,
                client_id: client_id.to_string(),
                limiter: self.name.clone(),
                algorithm: self.algorithm_name(),
            })
        }
    }

    /// The algorithm's configuration tag.
    pub fn algorithm_name(&self) -> &'static str {
        match &self.engine {
            Engine::TokenBucket(_) => TokenBucket::NAME,
            Engine::SlidingWindow(_) => SlidingWindowLog::NAME,
            Engine::FixedWindow(_) => FixedWindow::NAME,
        }
    }

    /// The configuration this limiter was built from.
    pub fn current_config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The limiter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of clients currently holding state.
    pub fn client_count(&self) -> usize {
        with_core!(&self.engine, core => core.store.len())
    }

    /// Whether `client_id` currently holds state.
    pub fn has_client(&self, client_id: &str) -> bool {
        with_core!(&self.engine, core => core.store.contains(client_id))
    }

    /// The shard `client_id` is routed to.
    pub fn shard_for(&self, client_id: &str) -> usize {
        with_core!(&self.engine, core => core.store.shard_for(client_id))
    }

    /// Forget one client; its next call behaves as a first call.
    pub fn reset(&self, client_id: &str) -> bool {
        debug!(limiter = %self.name, client_id = %client_id, "Resetting client state");
        with_core!(&self.engine, core => core.store.remove(client_id))
    }

    /// Forget every client.
    pub fn clear(&self) {
        with_core!(&self.engine, core => core.store.clear())
    }

    /// Run one expiry sweep now, on the calling thread.
    pub fn evict_expired(&self) -> SweepReport {
        with_core!(&self.engine, core => core.sweep())
    }

    /// Whether the janitor task is still running.
    pub fn janitor_running(&self) -> bool {
        self.janitor.is_running()
    }

    /// Stop the janitor and wait for it to exit.
    ///
    /// In-flight and later `try_acquire` calls are unaffected; idle state is
    /// simply no longer expired in the background.
    pub async fn shutdown(&self) {
        self.janitor.stop().await;
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Proof that a call was admitted.
///
/// The permit is logical: nothing needs to be released when it is dropped.
#[derive(Debug, Clone)]
pub struct Permit {
    pub client_id: String,
    pub result: RateLimitResult,
}
