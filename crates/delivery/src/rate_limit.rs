//! Token-bucket rate limiting per notification channel.
//!
//! One bucket per channel name, created lazily at full capacity. Every call
//! refills the bucket from elapsed time before looking at it, and the whole
//! refill/check/decrement sequence runs under the bucket's map-entry lock so
//! concurrent senders on one channel can never drive the count negative.

use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use serde::Serialize;
use shuttle_core::config::{ChannelLimitSettings, RateLimitSettings};
use shuttle_core::{ShuttleError, ShuttleResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bucket size and steady-state throughput for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLimit {
    capacity: u32,
    refill_per_second: f64,
}

impl ChannelLimit {
    pub fn new(capacity: u32, refill_per_second: f64) -> ShuttleResult<Self> {
        if capacity == 0 {
            return Err(ShuttleError::Config("bucket capacity must be positive".into()));
        }
        if !(refill_per_second > 0.0 && refill_per_second.is_finite()) {
            return Err(ShuttleError::Config("refill rate must be positive".into()));
        }
        Ok(Self {
            capacity,
            refill_per_second,
        })
    }

    /// `capacity` tokens per minute, refilled evenly.
    pub fn per_minute(capacity: u32) -> ShuttleResult<Self> {
        Self::new(capacity, f64::from(capacity) / 60.0)
    }

    pub fn from_settings(settings: &ChannelLimitSettings) -> ShuttleResult<Self> {
        if settings.window_secs <= 0.0 {
            return Err(ShuttleError::Config("rate limit window must be positive".into()));
        }
        Self::new(settings.capacity, settings.refill_per_second())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }
}

/// Token state for one channel.
#[derive(Debug, Clone)]
pub struct RateBucket {
    channel: String,
    capacity: u32,
    refill_rate: f64,
    current_tokens: f64,
    last_refill: Instant,
    rejected: u64,
}

impl RateBucket {
    pub fn new(channel: impl Into<String>, limit: ChannelLimit, now: Instant) -> Self {
        Self {
            channel: channel.into(),
            capacity: limit.capacity,
            refill_rate: limit.refill_per_second,
            current_tokens: f64::from(limit.capacity),
            last_refill: now,
            rejected: 0,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn tokens(&self) -> f64 {
        self.current_tokens
    }

    /// Sends turned away since the bucket was created.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Add tokens for the time elapsed since the last refill, capped at capacity.
    /// A `now` older than the last refill is a no-op.
    pub fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.current_tokens =
            (self.current_tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    pub fn has_token(&self) -> bool {
        self.current_tokens >= 1.0
    }

    /// Take one token if available.
    pub fn try_take(&mut self) -> bool {
        if self.has_token() {
            self.current_tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Return a token taken for a send that never happened.
    pub fn put_back(&mut self) {
        self.current_tokens = (self.current_tokens + 1.0).min(f64::from(self.capacity));
    }

    /// Time until at least one token is available.
    pub fn wait_time(&self) -> Duration {
        let missing = (1.0 - self.current_tokens).max(0.0);
        Duration::from_secs_f64(missing / self.refill_rate)
    }

    /// Resize the bucket, keeping the current token count within the new bound.
    pub fn resize(&mut self, limit: ChannelLimit) {
        self.capacity = limit.capacity;
        self.refill_rate = limit.refill_per_second;
        self.current_tokens = self.current_tokens.min(f64::from(limit.capacity));
    }
}

/// Snapshot of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub channel: String,
    pub capacity: u32,
    pub refill_per_second: f64,
    pub remaining: f64,
    pub rejected: u64,
}

/// Token-bucket limiter keyed by channel name.
///
/// Construct one at startup and share it by reference; there is no global instance.
pub struct RateLimiter<C: Clock = SystemClock> {
    buckets: DashMap<String, RateBucket>,
    limits: DashMap<String, ChannelLimit>,
    default_limit: ChannelLimit,
    clock: C,
}

impl RateLimiter<SystemClock> {
    pub fn new(default_limit: ChannelLimit) -> Self {
        Self::with_clock(default_limit, SystemClock)
    }

    pub fn from_settings(settings: &RateLimitSettings) -> ShuttleResult<Self> {
        Self::from_settings_with_clock(settings, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(default_limit: ChannelLimit, clock: C) -> Self {
        Self {
            buckets: DashMap::new(),
            limits: DashMap::new(),
            default_limit,
            clock,
        }
    }

    pub fn from_settings_with_clock(settings: &RateLimitSettings, clock: C) -> ShuttleResult<Self> {
        let limiter = Self::with_clock(ChannelLimit::from_settings(&settings.default)?, clock);
        for (channel, limit) in &settings.channels {
            limiter
                .limits
                .insert(channel.clone(), ChannelLimit::from_settings(limit)?);
        }
        info!(
            channels = settings.channels.len(),
            default_capacity = settings.default.capacity,
            "Rate limiter initialized"
        );
        Ok(limiter)
    }

    /// Replace the limit for `channel`. Its bucket restarts at full capacity.
    pub fn configure_channel(&self, channel: &str, limit: ChannelLimit) {
        self.limits.insert(channel.to_string(), limit);
        self.buckets.remove(channel);
        info!(
            channel = %channel,
            capacity = limit.capacity,
            refill_per_second = limit.refill_per_second,
            "Configured channel rate limit"
        );
    }

    pub fn limit_for(&self, channel: &str) -> ChannelLimit {
        self.limits
            .get(channel)
            .map(|l| *l.value())
            .unwrap_or(self.default_limit)
    }

    /// Refill the channel's bucket and run `f` on it while holding its entry lock.
    fn with_bucket<R>(&self, channel: &str, f: impl FnOnce(&mut RateBucket) -> R) -> R {
        let now = self.clock.now();
        if let Some(mut bucket) = self.buckets.get_mut(channel) {
            bucket.refill(now);
            return f(bucket.value_mut());
        }
        let limit = self.limit_for(channel);
        let mut bucket = self
            .buckets
            .entry(channel.to_string())
            .or_insert_with(|| RateBucket::new(channel, limit, now));
        bucket.refill(now);
        f(bucket.value_mut())
    }

    /// True when a token is available. Never consumes.
    pub fn can_send(&self, channel: &str) -> bool {
        self.with_bucket(channel, |b| b.has_token())
    }

    /// Take one token, or fail with `RateLimitExceeded`.
    pub fn consume(&self, channel: &str) -> ShuttleResult<()> {
        match self.take(channel) {
            Ok(()) => Ok(()),
            Err(retry_after) => Err(self.reject(channel, retry_after)),
        }
    }

    /// Take a token, or report how long until one is available.
    fn take(&self, channel: &str) -> Result<(), Duration> {
        let remaining = self.with_bucket(channel, |b| {
            if b.try_take() {
                Ok(b.tokens())
            } else {
                Err(b.wait_time())
            }
        })?;
        debug!(channel = %channel, remaining, "rate limit token consumed");
        Ok(())
    }

    /// Count a turned-away send and build its error.
    fn reject(&self, channel: &str, retry_after: Duration) -> ShuttleError {
        if let Some(mut bucket) = self.buckets.get_mut(channel) {
            bucket.rejected += 1;
        }
        metrics::counter!("rate_limit.rejected", "channel" => channel.to_string()).increment(1);
        ShuttleError::RateLimitExceeded {
            channel: channel.to_string(),
            retry_after,
        }
    }

    /// Time until the channel has a token; zero when one is available now.
    pub fn wait_time(&self, channel: &str) -> Duration {
        self.with_bucket(channel, |b| b.wait_time())
    }

    /// Wait for a token and consume it, giving up after `timeout`.
    /// Only the final give-up counts as a rejection.
    pub async fn acquire(&self, channel: &str, timeout: Duration) -> ShuttleResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let retry_after = match self.take(channel) {
                Ok(()) => return Ok(()),
                Err(retry_after) => retry_after,
            };

            let now = tokio::time::Instant::now();
            if now >= deadline || now + retry_after > deadline {
                warn!(
                    channel = %channel,
                    timeout_ms = timeout.as_millis() as u64,
                    "rate limit wait timed out"
                );
                return Err(self.reject(channel, retry_after));
            }
            // Refill math can land a hair short of a whole token.
            let pause = retry_after.max(Duration::from_millis(1));
            tokio::time::sleep(pause).await;
        }
    }

    pub fn stats(&self, channel: &str) -> BucketStats {
        self.with_bucket(channel, |b| BucketStats {
            channel: b.channel.clone(),
            capacity: b.capacity,
            refill_per_second: b.refill_rate,
            remaining: b.current_tokens,
            rejected: b.rejected,
        })
    }

    /// Stats for every bucket created so far, sorted by channel.
    pub fn all_stats(&self) -> Vec<BucketStats> {
        let mut channels: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        channels.sort();
        channels.iter().map(|c| self.stats(c)).collect()
    }

    /// Drop the channel's bucket; the next call starts at full capacity.
    pub fn reset(&self, channel: &str) {
        self.buckets.remove(channel);
    }
}
