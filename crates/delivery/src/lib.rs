//! Delivery guards: retry with exponential backoff, per-channel token-bucket
//! rate limiting, and an adaptive limiter driven by send outcomes.

pub mod adaptive;
pub mod clock;
pub mod rate_limit;
pub mod retry;

pub use adaptive::AdaptiveRateLimiter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limit::{BucketStats, ChannelLimit, RateBucket, RateLimiter};
pub use retry::{RetryConfig, RetryError, RetryPolicy};
