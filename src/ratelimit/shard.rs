//! Sharded per-client state storage.
//!
//! Client state lives in a fixed array of mutex-guarded maps. A client id is
//! routed to one shard by hash, and every read or write of that client's
//! state or last-access time happens while holding that shard's lock. No
//! operation ever holds two shard locks.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, error};

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Clients whose last access was inspected
    pub scanned: usize,
    /// Clients whose state was removed
    pub evicted: usize,
    /// Clients whose eviction failed and was skipped
    pub failed: usize,
}

pub(crate) struct ShardedStore<S> {
    shards: Box<[Mutex<HashMap<String, S>>]>,
    /// Last monotonic access time per client, written under the shard lock.
    last_access: DashMap<String, Duration>,
    hasher: RandomState,
}

impl<S> ShardedStore<S> {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            last_access: DashMap::new(),
            hasher: RandomState::new(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The shard a client id is routed to; stable for the store's lifetime.
    pub fn shard_for(&self, client_id: &str) -> usize {
        (self.hasher.hash_one(client_id) % self.shards.len() as u64) as usize
    }

    /// Run `f` on a client's state under its shard lock, creating the state
    /// with `init` if the client has none, and record the access time.
    pub fn with_state<R>(
        &self,
        client_id: &str,
        now: Duration,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        let mut shard = self.shards[self.shard_for(client_id)].lock();

        let state = shard.entry(client_id.to_owned()).or_insert_with(|| {
            debug!(client_id = %client_id, "Creating new client state");
            init()
        });
        let outcome = f(state);

        match self.last_access.get_mut(client_id) {
            Some(mut last) => *last = now,
            None => {
                self.last_access.insert(client_id.to_owned(), now);
            }
        }

        outcome
    }

    /// Remove one client's state. Returns whether it existed.
    pub fn remove(&self, client_id: &str) -> bool {
        let mut shard = self.shards[self.shard_for(client_id)].lock();
        self.last_access.remove(client_id);
        shard.remove(client_id).is_some()
    }

    /// Remove every client's state, one shard at a time.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            for (client_id, _) in shard.drain() {
                self.last_access.remove(&client_id);
            }
        }
    }

    /// Number of clients currently holding state.
    pub fn len(&self) -> usize {
        self.last_access.len()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        let shard = self.shards[self.shard_for(client_id)].lock();
        shard.contains_key(client_id)
    }

    /// Evict every client idle for longer than `ttl`.
    ///
    /// Candidates come from a snapshot of the last-access map taken without
    /// any shard lock. Each candidate is then re-checked under its own shard
    /// lock with a fresh `now()`, so a client refreshed in the meantime is
    /// kept. A failure while evicting one client is logged and skipped.
    pub fn evict_expired(&self, ttl: Duration, now: impl Fn() -> Duration) -> SweepReport {
        let snapshot_at = now();
        let candidates: Vec<String> = self
            .last_access
            .iter()
            .filter(|entry| snapshot_at.saturating_sub(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut report = SweepReport {
            scanned: self.last_access.len(),
            ..SweepReport::default()
        };

        for client_id in candidates {
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                self.evict_if_stale(&client_id, ttl, &now)
            }));
            match attempt {
                Ok(true) => report.evicted += 1,
                Ok(false) => {}
                Err(_) => {
                    error!(client_id = %client_id, "Failed to evict client state; skipping");
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn evict_if_stale(
        &self,
        client_id: &str,
        ttl: Duration,
        now: &impl Fn() -> Duration,
    ) -> bool {
        let mut shard = self.shards[self.shard_for(client_id)].lock();

        let last = self.last_access.get(client_id).map(|entry| *entry.value());
        match last {
            Some(last) if now().saturating_sub(last) > ttl => {
                self.last_access.remove(client_id);
                shard.remove(client_id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_shard_routing_is_stable() {
        let store: ShardedStore<u64> = ShardedStore::new(16);
        let shard = store.shard_for("client-a");
        assert!(shard < 16);
        for _ in 0..100 {
            assert_eq!(store.shard_for("client-a"), shard);
        }
    }

    #[test]
    fn test_zero_shards_clamped() {
        let store: ShardedStore<u64> = ShardedStore::new(0);
        assert_eq!(store.shard_count(), 1);
        assert_eq!(store.shard_for("anything"), 0);
    }

    #[test]
    fn test_with_state_creates_once() {
        let store: ShardedStore<u64> = ShardedStore::new(4);
        for expected in 1..=3 {
            let value = store.with_state("a", secs(0), || 0, |v| {
                *v += 1;
                *v
            });
            assert_eq!(value, expected);
        }
        assert_eq!(store.len(), 1);
        assert!(store.contains("a"));
    }

    #[test]
    fn test_remove_and_clear() {
        let store: ShardedStore<u64> = ShardedStore::new(4);
        for id in ["a", "b", "c"] {
            store.with_state(id, secs(0), || 0, |_| ());
        }
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.len(), 2);

        store.clear();
        assert_eq!(store.len(), 0);
        assert!(!store.contains("b"));
    }

    #[test]
    fn test_evict_expired_only_removes_idle() {
        let store: ShardedStore<u64> = ShardedStore::new(8);
        store.with_state("idle", secs(0), || 0, |_| ());
        store.with_state("busy", secs(90), || 0, |_| ());

        let report = store.evict_expired(secs(60), || secs(100));
        assert_eq!(
            report,
            SweepReport {
                scanned: 2,
                evicted: 1,
                failed: 0
            }
        );
        assert!(!store.contains("idle"));
        assert!(store.contains("busy"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_recheck_keeps_refreshed_client() {
        let store: ShardedStore<u64> = ShardedStore::new(8);
        store.with_state("a", secs(0), || 0, |_| ());

        // A snapshot taken now would list "a"; it is refreshed before the
        // per-client re-check.
        let stale: Vec<String> = store
            .last_access
            .iter()
            .filter(|entry| secs(100).saturating_sub(*entry.value()) > secs(60))
            .map(|entry| entry.key().clone())
            .collect();
        assert_eq!(stale, vec!["a".to_string()]);

        store.with_state("a", secs(100), || 0, |_| ());
        assert!(!store.evict_if_stale("a", secs(60), &|| secs(100)));
        assert!(store.contains("a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_panicking_eviction_is_isolated() {
        let store: ShardedStore<u64> = ShardedStore::new(1);
        store.with_state("a", secs(0), || 0, |_| ());
        store.with_state("b", secs(0), || 0, |_| ());

        let calls = std::cell::Cell::new(0);
        let report = store.evict_expired(secs(10), || {
            calls.set(calls.get() + 1);
            if calls.get() == 2 {
                panic!("clock failure");
            }
            secs(100)
        });
        assert_eq!(report.evicted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store: Arc<ShardedStore<u64>> = Arc::new(ShardedStore::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        store.with_state("shared", secs(0), || 0, |v| *v += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let total = store.with_state("shared", secs(0), || 0, |v| *v);
        assert_eq!(total, 8_000);
    }
}
