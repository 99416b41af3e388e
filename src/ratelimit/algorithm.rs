//! The per-algorithm decision interface.

use super::clock::Timestamp;
use super::result::RateLimitResult;

/// A pure rate limiting decision function.
///
/// Implementations hold only immutable parameters. All mutable per-client
/// data lives in `State`, which the limiter stores and hands back under the
/// client's shard lock, so a decision is a function of
/// `(state, now, parameters)` alone.
pub trait Algorithm: Send + Sync + 'static {
    /// Mutable per-client state.
    type State: Send + 'static;

    /// The configuration tag of this algorithm.
    const NAME: &'static str;

    /// State for a client seen for the first time at `now`.
    fn new_state(&self, now: Timestamp) -> Self::State;

    /// Decide whether one call at `now` is admitted, updating `state`.
    fn decide(&self, state: &mut Self::State, now: Timestamp) -> RateLimitResult;

    /// The configured quota reported in results.
    fn limit(&self) -> u64;
}
