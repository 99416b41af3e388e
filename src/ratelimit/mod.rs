//! Rate limiting algorithms, state management and the limiter façade.

mod algorithm;
mod clock;
mod factory;
mod fixed_window;
mod guard;
mod janitor;
mod limiter;
mod result;
mod shard;
mod sliding_window;
mod token_bucket;

pub use algorithm::Algorithm;
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use factory::{LimiterRegistry, RateLimiterFactory};
pub use fixed_window::{FixedWindow, FixedWindowState};
pub use guard::Guarded;
pub use janitor::{sweep_interval, JANITOR_TICK};
pub use limiter::{Permit, RateLimiter};
pub use result::RateLimitResult;
pub use shard::SweepReport;
pub use sliding_window::{SlidingWindowLog, SlidingWindowState};
pub use token_bucket::{TokenBucket, TokenBucketState};
