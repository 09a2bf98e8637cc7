//! Bounded retries with exponential backoff and jitter.

use rand::Rng;
use shuttle_core::config::RetrySettings;
use shuttle_core::{ShuttleError, ShuttleResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Immutable retry parameters, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
}

impl Default for RetryConfig {
    /// 3 retries, 1s initial delay, 60s cap, base 2, jitter on.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
        jitter: bool,
    ) -> ShuttleResult<Self> {
        if initial_delay.is_zero() {
            return Err(ShuttleError::Config("initial_delay must be positive".into()));
        }
        if max_delay < initial_delay {
            return Err(ShuttleError::Config("max_delay must be >= initial_delay".into()));
        }
        if !(exponential_base > 1.0 && exponential_base.is_finite()) {
            return Err(ShuttleError::Config("exponential_base must be > 1".into()));
        }
        Ok(Self {
            max_retries,
            initial_delay,
            max_delay,
            exponential_base,
            jitter,
        })
    }

    /// Default backoff shape with the given retry budget and first delay, no jitter.
    pub fn fixed(max_retries: u32, initial_delay: Duration) -> ShuttleResult<Self> {
        let defaults = Self::default();
        Self::new(
            max_retries,
            initial_delay,
            defaults.max_delay.max(initial_delay),
            defaults.exponential_base,
            false,
        )
    }

    pub fn from_settings(settings: &RetrySettings) -> ShuttleResult<Self> {
        let secs = |v: f64, name: &str| {
            Duration::try_from_secs_f64(v)
                .map_err(|_| ShuttleError::Config(format!("retry.{name} is not a valid duration")))
        };
        Self::new(
            settings.max_retries,
            secs(settings.initial_delay_secs, "initial_delay_secs")?,
            secs(settings.max_delay_secs, "max_delay_secs")?,
            settings.exponential_base,
            settings.jitter,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Delay before retry `n` (n >= 1), without jitter:
    /// `min(max_delay, initial_delay * base^(n-1))`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = f64::from(retry.saturating_sub(1));
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powf(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        // Near `Duration::MAX` the f64 round-trip can land past the representable range.
        Duration::try_from_secs_f64(capped).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Delay before retry `n`, scaled by a factor in [0.5, 1.5) when jitter is on.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.jitter {
            return base;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// The predicate classified the error as terminal.
    Aborted { attempts: u32, error: E },
    /// The cancellation token fired between attempts.
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Aborted { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Aborted { error, .. } => Some(error),
            RetryError::Cancelled { last, .. } => last.as_ref(),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Aborted { error, .. } => Some(error),
            RetryError::Cancelled { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "retry exhausted after {attempts} attempts: {last}")
            }
            RetryError::Aborted { attempts, error } => {
                write!(f, "non-retryable failure on attempt {attempts}: {error}")
            }
            RetryError::Cancelled { attempts, .. } => {
                write!(f, "retry cancelled after {attempts} attempts")
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl<E: Into<ShuttleError>> From<RetryError<E>> for ShuttleError {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => ShuttleError::RetryExhausted {
                attempts,
                last: Box::new(last.into()),
            },
            RetryError::Aborted { error, .. } => error.into(),
            RetryError::Cancelled { attempts, .. } => {
                ShuttleError::Internal(anyhow::anyhow!("retry cancelled after {attempts} attempts"))
            }
        }
    }
}

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

fn always_retry<E>(_: &E) -> bool {
    true
}

/// Runs an async operation until it succeeds, fails terminally, or runs out of attempts.
pub struct RetryPolicy<E> {
    config: RetryConfig,
    retryable: Predicate<E>,
    cancel: Option<CancellationToken>,
    label: String,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            retryable: Arc::clone(&self.retryable),
            cancel: self.cancel.clone(),
            label: self.label.clone(),
        }
    }
}

impl<E: 'static> RetryPolicy<E> {
    /// Every error is retryable until told otherwise.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retryable: Arc::new(always_retry::<E>),
            cancel: None,
            label: "operation".to_string(),
        }
    }

    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Abandon the loop between attempts once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Name used in log lines and metric labels.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = self.config.max_attempts();
        let mut attempt: u32 = 0;
        let mut last_error: Option<E> = None;

        loop {
            if self.is_cancelled() {
                debug!(label = %self.label, attempts = attempt, "retry loop cancelled");
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    last: last_error,
                });
            }

            attempt += 1;
            metrics::counter!("retry.attempts", "label" => self.label.clone()).increment(1);

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label = %self.label, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !(self.retryable)(&err) {
                warn!(
                    label = %self.label,
                    attempt,
                    error = %err,
                    "non-retryable failure, giving up"
                );
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error: err,
                });
            }

            if attempt >= max_attempts {
                error!(
                    label = %self.label,
                    attempts = attempt,
                    error = %err,
                    "operation failed after all attempts"
                );
                metrics::counter!("retry.exhausted", "label" => self.label.clone()).increment(1);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.config.delay_for(attempt);
            warn!(
                label = %self.label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            last_error = Some(err);

            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

impl RetryPolicy<ShuttleError> {
    /// Retries only errors that [`ShuttleError::is_retryable`] accepts.
    pub fn for_shuttle_errors(config: RetryConfig) -> Self {
        Self::new(config).retry_if(ShuttleError::is_retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_core::{ProviderError, ProviderErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(max_retries: u32, initial_ms: u64) -> RetryConfig {
        RetryConfig::new(
            max_retries,
            Duration::from_millis(initial_ms),
            Duration::from_secs(60),
            2.0,
            false,
        )
        .unwrap()
    }

    fn transient() -> ProviderError {
        ProviderError::new("test", ProviderErrorKind::Timeout, "deadline elapsed")
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::new(3, Duration::ZERO, Duration::from_secs(1), 2.0, true).is_err());
        assert!(RetryConfig::new(3, Duration::from_secs(2), Duration::from_secs(1), 2.0, true).is_err());
        assert!(RetryConfig::new(3, Duration::from_secs(1), Duration::from_secs(1), 1.0, true).is_err());
        assert!(RetryConfig::new(0, Duration::from_secs(1), Duration::from_secs(1), 1.5, false).is_ok());
    }

    #[test]
    fn test_from_settings() {
        let config = RetryConfig::from_settings(&RetrySettings::default()).unwrap();
        assert_eq!(config, RetryConfig::default());

        let bad = RetrySettings {
            initial_delay_secs: -1.0,
            ..RetrySettings::default()
        };
        assert!(RetryConfig::from_settings(&bad).is_err());
    }

    #[test]
    fn test_exponential_delays_capped() {
        let config = RetryConfig::new(10, Duration::from_secs(1), Duration::from_secs(60), 2.0, false).unwrap();
        let delays: Vec<u64> = (1..=8).map(|n| config.base_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.base_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_unbounded_max_delay_does_not_overflow() {
        let config = RetryConfig::new(3, Duration::from_secs(1), Duration::MAX, 2.0, false).unwrap();
        assert_eq!(config.base_delay(3), Duration::from_secs(4));
        assert_eq!(config.base_delay(100), Duration::MAX);
        assert_eq!(config.base_delay(u32::MAX), Duration::MAX);

        let jittered = RetryConfig::new(3, Duration::from_secs(1), Duration::MAX, 2.0, true).unwrap();
        for _ in 0..50 {
            assert!(jittered.delay_for(100) > Duration::from_secs(u64::MAX / 4));
            let early = jittered.delay_for(1);
            assert!(early >= Duration::from_millis(500) && early < Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::new(5, Duration::from_secs(4), Duration::from_secs(60), 2.0, true).unwrap();
        for _ in 0..200 {
            let d = config.delay_for(1).as_secs_f64();
            assert!((2.0..6.0).contains(&d), "jittered delay {d} out of range");
        }
        let capped = RetryConfig::new(5, Duration::from_secs(50), Duration::from_secs(60), 2.0, true).unwrap();
        for _ in 0..200 {
            assert!(capped.delay_for(3) <= Duration::from_secs(60));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_runs_max_retries_plus_one() {
        for n in [0u32, 1, 4] {
            let calls = AtomicU32::new(0);
            let policy = RetryPolicy::new(no_jitter(n, 10));
            let result: Result<(), _> = policy
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(transient()) }
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), n + 1);
            match result {
                Err(RetryError::Exhausted { attempts, last }) => {
                    assert_eq!(attempts, n + 1);
                    assert_eq!(last.kind(), ProviderErrorKind::Timeout);
                }
                other => panic!("expected exhaustion, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_failures_with_expected_wait() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(no_jitter(2, 100));
        let start = tokio::time::Instant::now();

        let result = policy
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(transient())
                    } else {
                        Ok("msg-123")
                    }
                }
            })
            .await;

        let waited = start.elapsed();
        assert_eq!(result.unwrap(), "msg-123");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(waited >= Duration::from_millis(300), "waited {waited:?}");
        assert!(waited < Duration::from_millis(310), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(no_jitter(5, 10)).retry_if(ProviderError::is_retryable);

        let result: Result<(), _> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::invalid_recipient("twilio_sms", "bad number")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Aborted { attempts: 1, .. }));

        let shuttle: ShuttleError = err.into();
        assert!(matches!(shuttle, ShuttleError::Provider(ref e) if e.kind() == ProviderErrorKind::InvalidRecipient));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_converts_to_retry_exhausted() {
        let policy = RetryPolicy::new(no_jitter(1, 10));
        let result: Result<(), RetryError<ProviderError>> =
            policy.execute(|| async { Err(transient()) }).await;

        match ShuttleError::from(result.unwrap_err()) {
            ShuttleError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.is_retryable());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::<ProviderError>::new(no_jitter(3, 10)).with_cancellation(token);

        let result: Result<(), _> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0, last: None })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_backoff_keeps_last_error() {
        let token = CancellationToken::new();
        let policy = RetryPolicy::new(no_jitter(5, 1_000)).with_cancellation(token.clone());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err(transient()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::Cancelled { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert!(last.is_some());
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shuttle_error_policy_classifies() {
        let policy = RetryPolicy::for_shuttle_errors(no_jitter(3, 10));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ShuttleError::Validation("bad coordinates".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Aborted { .. })));
    }
}
