//! Application context: builds the shared limiter, providers, conflict
//! detector and template catalog from configuration at startup.

use crate::dispatcher::NotificationDispatcher;
use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use shuttle_channels::factory::provider_from_settings;
use shuttle_channels::templates::detect_language;
use shuttle_channels::{DeliveryReceipt, NotificationProvider, NotificationType, Provider, TemplateCatalog};
use shuttle_core::{AppConfig, NotificationChannel, NotificationRequest, ShuttleError, ShuttleResult};
use shuttle_delivery::{RateLimiter, RetryConfig};
use shuttle_scheduling::{AllConflicts, AssignmentStore, ConflictDetector, InMemoryAssignmentStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A templated notification addressed to one passenger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub recipient: String,
    /// Passenger's preferred language, if set on their profile.
    #[serde(default)]
    pub passenger_language: Option<String>,
    /// Locale of the message context. Detected from `passenger_name` when absent.
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub values: HashMap<String, String>,
}

impl Notice {
    pub fn new(notification_type: NotificationType, channel: NotificationChannel, recipient: impl Into<String>) -> Self {
        Self {
            notification_type,
            channel,
            recipient: recipient.into(),
            passenger_language: None,
            locale: None,
            values: HashMap::new(),
        }
    }

    pub fn in_language(mut self, language: impl Into<String>) -> Self {
        self.passenger_language = Some(language.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    fn detected_locale(&self) -> Option<&str> {
        self.locale
            .as_deref()
            .or_else(|| self.values.get("passenger_name").and_then(|name| detect_language(name)))
    }
}

/// Shared ShuttleBee services. Construct once and share by `Arc`.
pub struct ShuttleBee {
    config: AppConfig,
    rate_limiter: Arc<RateLimiter>,
    dispatcher: NotificationDispatcher,
    conflicts: ConflictDetector,
    templates: TemplateCatalog,
    cancel: CancellationToken,
}

impl ShuttleBee {
    /// Load configuration from the environment and build the context.
    pub fn load() -> anyhow::Result<Self> {
        let config = AppConfig::load().context("loading ShuttleBee configuration")?;
        Self::from_config(config).context("building ShuttleBee services")
    }

    /// Like [`ShuttleBee::load`], layering the environment over a TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = AppConfig::load_from(path)
            .with_context(|| format!("loading ShuttleBee configuration from {}", path.display()))?;
        Self::from_config(config).context("building ShuttleBee services")
    }

    /// Build with an in-memory assignment store.
    pub fn from_config(config: AppConfig) -> ShuttleResult<Self> {
        Self::with_assignment_store(config, Arc::new(InMemoryAssignmentStore::new()))
    }

    pub fn with_assignment_store(config: AppConfig, store: Arc<dyn AssignmentStore>) -> ShuttleResult<Self> {
        config.validate()?;

        let rate_limiter = Arc::new(RateLimiter::from_settings(&config.rate_limits)?);
        let retry = RetryConfig::from_settings(&config.retry)?;
        let acquire_timeout = Duration::try_from_secs_f64(config.rate_limits.acquire_timeout_secs)
            .map_err(|_| ShuttleError::Config("rate_limits.acquire_timeout_secs is not a valid duration".into()))?;
        let cancel = CancellationToken::new();

        let mut dispatcher = NotificationDispatcher::new(Arc::clone(&rate_limiter), retry, acquire_timeout)
            .with_cancellation(cancel.clone());
        for settings in &config.providers {
            let provider = provider_from_settings(settings)?;
            provider.validate_config()?;
            if dispatcher.provider_for(provider.channel()).is_some() {
                warn!(
                    channel = %provider.channel(),
                    provider = %provider.name(),
                    "replacing previously configured provider"
                );
            }
            dispatcher = dispatcher.with_provider(provider);
        }

        let conflicts = ConflictDetector::from_settings(store, &config.scheduling)?;
        let templates = TemplateCatalog::from_settings(&config.templates);

        info!(
            providers = config.providers.len(),
            max_retries = retry.max_retries(),
            default_trip_minutes = config.scheduling.default_trip_duration_minutes,
            "ShuttleBee services ready"
        );

        Ok(Self {
            config,
            rate_limiter,
            dispatcher,
            conflicts,
            templates,
            cancel,
        })
    }

    /// Register a provider outside of configuration, replacing the one for its channel.
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.dispatcher = self.dispatcher.with_provider(provider);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn conflicts(&self) -> &ConflictDetector {
        &self.conflicts
    }

    pub fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    /// Render the best template for `notice` and send it.
    pub async fn notify(&self, notice: &Notice) -> ShuttleResult<DeliveryReceipt> {
        let chain = self
            .templates
            .language_chain(notice.passenger_language.as_deref(), notice.detected_locale());
        let template = self
            .templates
            .resolve(notice.notification_type, notice.channel, &chain)
            .ok_or_else(|| {
                ShuttleError::Validation(format!(
                    "no active '{}' template for {} in {:?}",
                    notice.notification_type,
                    notice.channel,
                    chain.languages()
                ))
            })?;

        let mut request = NotificationRequest::new(notice.channel, notice.recipient.as_str(), template.render(&notice.values))
            .with_metadata("notification_type", notice.notification_type.as_str())
            .with_metadata("language", template.language.as_str());
        if let Some(subject) = &template.subject {
            request = request
                .with_metadata("subject", subject.as_str())
                .with_metadata("title", subject.as_str());
        }
        if let Some(trip_id) = notice.values.get("trip_id") {
            request = request.with_metadata("trip_id", trip_id.as_str());
        }

        self.dispatcher.send(&request).await
    }

    /// Vehicle and driver double-booking check for a prospective assignment.
    pub fn check_conflicts(
        &self,
        vehicle: Option<u64>,
        driver: Option<u64>,
        date: NaiveDate,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
        exclude_id: Option<u64>,
    ) -> ShuttleResult<AllConflicts> {
        self.conflicts
            .check_all_conflicts(vehicle, driver, date, start, end, exclude_id)
    }

    /// Stop in-flight retry loops. Sends already on the wire complete.
    pub fn shutdown(&self) {
        info!("ShuttleBee shutting down");
        self.cancel.cancel();
    }
}
