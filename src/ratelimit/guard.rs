//! Call-site adapters that turn denials into errors.

use std::future::Future;
use std::sync::Arc;

use super::limiter::RateLimiter;
use crate::error::RateLimitExceeded;

/// Wraps operations so they only run when the limiter admits the caller.
///
/// The client id is derived from each call's input by `extract`.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use sentinel_limit::{Guarded, LimiterConfig, RateLimiter};
/// # async fn demo() -> anyhow::Result<()> {
/// struct Request { api_key: String }
///
/// let limiter = Arc::new(RateLimiter::new(LimiterConfig::token_bucket(10, 1.0))?);
/// let guarded = Guarded::new(limiter, |req: &Request| req.api_key.clone());
///
/// let req = Request { api_key: "k-123".into() };
/// let body = guarded.call(&req, |_| "ok")?;
/// # Ok(())
/// # }
/// ```
pub struct Guarded<E> {
    limiter: Arc<RateLimiter>,
    extract: E,
}

impl<E> Guarded<E> {
    pub fn new(limiter: Arc<RateLimiter>, extract: E) -> Self {
        Self { limiter, extract }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run `op` if the caller identified by `input` is admitted.
    pub fn call<T, R, F>(&self, input: &T, op: F) -> Result<R, RateLimitExceeded>
    where
        E: Fn(&T) -> String,
        F: FnOnce(&T) -> R,
        T: ?Sized,
    {
        let client_id = (self.extract)(input);
        self.limiter.acquire(&client_id)?;
        Ok(op(input))
    }

    /// Run the future produced by `op` if the caller is admitted.
    ///
    /// The decision is made before `op` is invoked; a denied caller's future
    /// is never created.
    pub async fn call_async<'a, T, R, F, Fut>(
        &self,
        input: &'a T,
        op: F,
    ) -> Result<R, RateLimitExceeded>
    where
        E: Fn(&T) -> String,
        F: FnOnce(&'a T) -> Fut,
        Fut: Future<Output = R>,
        T: ?Sized,
    {
        let client_id = (self.extract)(input);
        self.limiter.acquire(&client_id)?;
        Ok(op(input).await)
    }
}
