//! Rate limiter that tunes its own ceiling from observed send outcomes.

use crate::clock::{Clock, SystemClock};
use crate::rate_limit::{ChannelLimit, RateBucket};
use parking_lot::Mutex;
use shuttle_core::ShuttleResult;
use std::time::Duration;
use tracing::{info, warn};

const EVALUATION_SAMPLE: u32 = 100;
const RESET_AFTER: u32 = 1000;
const RAISE_ABOVE: f64 = 0.95;
const LOWER_BELOW: f64 = 0.85;

struct AdaptiveState {
    bucket: RateBucket,
    current_limit: u32,
    successes: u32,
    failures: u32,
}

/// Single-bucket limiter whose capacity follows the provider's health.
///
/// Every 100 recorded outcomes the success rate is evaluated: above 95% the
/// limit grows by 10%, below 85% it shrinks by 10%. A rate-limit response
/// from the provider halves it immediately. The limit stays in `[min, max]`.
pub struct AdaptiveRateLimiter<C: Clock = SystemClock> {
    state: Mutex<AdaptiveState>,
    window: Duration,
    min_limit: u32,
    max_limit: u32,
    clock: C,
}

impl AdaptiveRateLimiter<SystemClock> {
    pub fn new(initial_limit: u32, window: Duration, min_limit: u32, max_limit: u32) -> ShuttleResult<Self> {
        Self::with_clock(initial_limit, window, min_limit, max_limit, SystemClock)
    }
}

impl<C: Clock> AdaptiveRateLimiter<C> {
    pub fn with_clock(
        initial_limit: u32,
        window: Duration,
        min_limit: u32,
        max_limit: u32,
        clock: C,
    ) -> ShuttleResult<Self> {
        let min_limit = min_limit.max(1);
        let initial = initial_limit.clamp(min_limit, max_limit.max(min_limit));
        let limit = Self::limit(initial, window)?;
        let bucket = RateBucket::new("adaptive", limit, clock.now());
        Ok(Self {
            state: Mutex::new(AdaptiveState {
                bucket,
                current_limit: initial,
                successes: 0,
                failures: 0,
            }),
            window,
            min_limit,
            max_limit: max_limit.max(min_limit),
            clock,
        })
    }

    fn limit(capacity: u32, window: Duration) -> ShuttleResult<ChannelLimit> {
        ChannelLimit::new(capacity, f64::from(capacity) / window.as_secs_f64())
    }

    /// Take a token if one is available.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.bucket.refill(now);
        state.bucket.try_take()
    }

    /// Give back a token from [`try_acquire`](Self::try_acquire) when the send was abandoned.
    pub fn release(&self) {
        self.state.lock().bucket.put_back();
    }

    /// Time until a token is available; zero when one is available now.
    pub fn wait_time(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.bucket.refill(now);
        state.bucket.wait_time()
    }

    pub fn available(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.bucket.refill(now);
        state.bucket.tokens()
    }

    pub fn current_limit(&self) -> u32 {
        self.state.lock().current_limit
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.successes += 1;
        self.evaluate(&mut state);
    }

    /// Record a failed send; `rate_limited` marks a provider throttling response.
    pub fn record_failure(&self, rate_limited: bool) {
        let mut state = self.state.lock();
        state.failures += 1;
        if rate_limited {
            let halved = state.current_limit / 2;
            self.apply_limit(&mut state, halved);
        }
        self.evaluate(&mut state);
    }

    fn evaluate(&self, state: &mut AdaptiveState) {
        let total = state.successes + state.failures;
        if total < EVALUATION_SAMPLE || total % EVALUATION_SAMPLE != 0 {
            return;
        }

        let success_rate = f64::from(state.successes) / f64::from(total);
        if success_rate > RAISE_ABOVE {
            let raised = (f64::from(state.current_limit) * 1.1) as u32;
            self.apply_limit(state, raised);
        } else if success_rate < LOWER_BELOW {
            let lowered = (f64::from(state.current_limit) * 0.9) as u32;
            self.apply_limit(state, lowered);
        }

        if total >= RESET_AFTER {
            state.successes = 0;
            state.failures = 0;
        }
    }

    fn apply_limit(&self, state: &mut AdaptiveState, proposed: u32) {
        let next = proposed.clamp(self.min_limit, self.max_limit);
        if next == state.current_limit {
            return;
        }
        if next > state.current_limit {
            info!(from = state.current_limit, to = next, "Raising adaptive rate limit");
        } else {
            warn!(from = state.current_limit, to = next, "Lowering adaptive rate limit");
        }
        // Window and limit were validated at construction, so this cannot fail.
        if let Ok(limit) = Self::limit(next, self.window) {
            state.bucket.resize(limit);
            state.current_limit = next;
        }
    }
}
