//! Notification dispatcher: routes a request to its channel's provider
//! behind the rate limiter and the retry policy.

use shuttle_channels::{DeliveryReceipt, NotificationProvider, Provider};
use shuttle_core::telemetry::ScopedTimer;
use shuttle_core::validation::validate_recipient;
use shuttle_core::{
    NotificationChannel, NotificationRequest, ProviderError, ProviderErrorKind, ShuttleError,
    ShuttleResult,
};
use shuttle_delivery::{AdaptiveRateLimiter, RateLimiter, RetryConfig, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sends notifications through the configured provider for each channel.
pub struct NotificationDispatcher {
    providers: HashMap<NotificationChannel, Arc<Provider>>,
    adaptive: HashMap<NotificationChannel, Arc<AdaptiveRateLimiter>>,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    acquire_timeout: Duration,
    cancel: CancellationToken,
}

impl NotificationDispatcher {
    pub fn new(rate_limiter: Arc<RateLimiter>, retry: RetryConfig, acquire_timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            adaptive: HashMap::new(),
            rate_limiter,
            retry,
            acquire_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Register `provider` for its channel, replacing any previous one.
    pub fn with_provider(mut self, provider: Provider) -> Self {
        let channel = provider.channel();
        info!(channel = %channel, provider = %provider.name(), "provider registered");
        self.providers.insert(channel, Arc::new(provider));
        self
    }

    /// Gate `channel` with an outcome-driven limiter on top of the token bucket.
    pub fn with_adaptive_limit(mut self, channel: NotificationChannel, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.adaptive.insert(channel, limiter);
        self
    }

    /// Token cancelled on shutdown; retry loops stop between attempts.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn provider_for(&self, channel: NotificationChannel) -> Option<&Provider> {
        self.providers.get(&channel).map(Arc::as_ref)
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        let mut channels: Vec<_> = self.providers.keys().copied().collect();
        channels.sort();
        channels
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Validate, take a rate-limit token, then send with retries.
    ///
    /// Terminal provider failures surface as `ShuttleError::Provider`;
    /// exhausted retries as `ShuttleError::RetryExhausted`.
    pub async fn send(&self, request: &NotificationRequest) -> ShuttleResult<DeliveryReceipt> {
        let channel = request.channel;
        let timer = ScopedTimer::start(format!("notification.send.{channel}"));

        validate_recipient(channel, &request.recipient)?;
        let provider = self
            .providers
            .get(&channel)
            .ok_or_else(|| ShuttleError::Config(format!("no provider configured for channel '{channel}'")))?
            .as_ref();

        let adaptive = self.adaptive.get(&channel).map(Arc::as_ref);
        if let Some(limiter) = adaptive {
            if !limiter.try_acquire() {
                return Err(ShuttleError::RateLimitExceeded {
                    channel: channel.to_string(),
                    retry_after: limiter.wait_time(),
                });
            }
        }
        if let Err(err) = self
            .rate_limiter
            .acquire(channel.as_str(), self.acquire_timeout)
            .await
        {
            // Nothing was sent, so the adaptive token goes back.
            if let Some(limiter) = adaptive {
                limiter.release();
            }
            return Err(err);
        }

        let policy = RetryPolicy::<ProviderError>::new(self.retry)
            .retry_if(ProviderError::is_retryable)
            .with_cancellation(self.cancel.child_token())
            .with_label(provider.name());

        let outcome = policy
            .execute(|| async move {
                let result = provider.send(request).await;
                if let Some(limiter) = adaptive {
                    match &result {
                        Ok(_) => limiter.record_success(),
                        Err(e) => limiter.record_failure(e.kind() == ProviderErrorKind::RateLimited),
                    }
                }
                result
            })
            .await;

        match outcome {
            Ok(receipt) => {
                metrics::counter!(
                    "notifications.sent",
                    "channel" => channel.as_str(),
                    "provider" => provider.name().to_string()
                )
                .increment(1);
                let elapsed = timer.succeed();
                debug!(
                    channel = %channel,
                    provider_message_id = ?receipt.provider_message_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "notification delivered to provider"
                );
                Ok(receipt)
            }
            Err(err) => {
                metrics::counter!(
                    "notifications.failed",
                    "channel" => channel.as_str(),
                    "provider" => provider.name().to_string()
                )
                .increment(1);
                warn!(channel = %channel, attempts = err.attempts(), error = %err, "notification failed");
                Err(err.into())
            }
        }
    }
}
