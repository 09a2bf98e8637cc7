use crate::error::{ShuttleError, ShuttleResult};
use crate::types::NotificationChannel;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Root configuration. Loaded from environment variables with the prefix
/// `SHUTTLEBEE__` and, optionally, a TOML file underneath them.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default)]
    pub scheduling: SchedulingSettings,
    #[serde(default)]
    pub templates: TemplateSettings,
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

/// Retry behaviour for provider sends. Durations are in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

/// `capacity` tokens refilled evenly over `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ChannelLimitSettings {
    pub capacity: u32,
    pub window_secs: f64,
}

impl ChannelLimitSettings {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            window_secs: 60.0,
        }
    }

    pub fn refill_per_second(&self) -> f64 {
        self.capacity as f64 / self.window_secs
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Limit for channel names without an explicit entry.
    #[serde(default = "default_channel_limit")]
    pub default: ChannelLimitSettings,
    #[serde(default = "default_channel_limits")]
    pub channels: HashMap<String, ChannelLimitSettings>,
    /// How long a dispatcher waits for a token before giving up.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingSettings {
    /// Duration assumed for assignments that have no planned end.
    #[serde(default = "default_trip_duration_minutes")]
    pub default_trip_duration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSettings {
    /// Last entry of every language fallback chain.
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Company-wide preference, tried before the system default.
    #[serde(default)]
    pub company_language: Option<String>,
}

/// Transport settings for one notification provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// Provider tag, e.g. `twilio_sms`, `waha`, `firebase_push`.
    pub kind: String,
    pub channel: NotificationChannel,
    pub api_url: String,
    pub api_key: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    /// WAHA session name.
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
}

impl ProviderSettings {
    pub fn new(
        kind: impl Into<String>,
        channel: NotificationChannel,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            channel,
            api_url: api_url.into(),
            api_key: api_key.into(),
            timeout_secs: default_provider_timeout_secs(),
            from_number: None,
            account_sid: None,
            phone_number_id: None,
            session: None,
            from_email: None,
            from_name: None,
        }
    }
}

// Default functions
fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_secs() -> f64 {
    1.0
}
fn default_max_delay_secs() -> f64 {
    60.0
}
fn default_exponential_base() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}
fn default_channel_limit() -> ChannelLimitSettings {
    ChannelLimitSettings::per_minute(60)
}
fn default_channel_limits() -> HashMap<String, ChannelLimitSettings> {
    [
        (NotificationChannel::Sms, 100),
        (NotificationChannel::WhatsApp, 80),
        (NotificationChannel::Email, 200),
        (NotificationChannel::Push, 500),
    ]
    .into_iter()
    .map(|(channel, per_minute)| {
        (
            channel.as_str().to_string(),
            ChannelLimitSettings::per_minute(per_minute),
        )
    })
    .collect()
}
fn default_acquire_timeout_secs() -> f64 {
    30.0
}
fn default_trip_duration_minutes() -> i64 {
    120
}
fn default_language() -> String {
    "ar".to_string()
}
fn default_provider_timeout_secs() -> u64 {
    10
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default: default_channel_limit(),
            channels: default_channel_limits(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl RateLimitSettings {
    pub fn limit_for(&self, channel: &str) -> ChannelLimitSettings {
        self.channels.get(channel).copied().unwrap_or(self.default)
    }
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            default_trip_duration_minutes: default_trip_duration_minutes(),
        }
    }
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            company_language: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            rate_limits: RateLimitSettings::default(),
            scheduling: SchedulingSettings::default(),
            templates: TemplateSettings::default(),
            providers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> ShuttleResult<Self> {
        Self::build(None)
    }

    /// Load a TOML file, with environment variables layered on top.
    pub fn load_from(path: impl AsRef<Path>) -> ShuttleResult<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> ShuttleResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("SHUTTLEBEE")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the helpers cannot operate with.
    pub fn validate(&self) -> ShuttleResult<()> {
        let r = &self.retry;
        if r.initial_delay_secs <= 0.0 || !r.initial_delay_secs.is_finite() {
            return Err(ShuttleError::Config("retry.initial_delay_secs must be positive".into()));
        }
        if r.max_delay_secs < r.initial_delay_secs {
            return Err(ShuttleError::Config(
                "retry.max_delay_secs must be >= retry.initial_delay_secs".into(),
            ));
        }
        if r.exponential_base <= 1.0 {
            return Err(ShuttleError::Config("retry.exponential_base must be > 1".into()));
        }

        let limits = std::iter::once(("default", &self.rate_limits.default)).chain(
            self.rate_limits
                .channels
                .iter()
                .map(|(name, limit)| (name.as_str(), limit)),
        );
        for (name, limit) in limits {
            if limit.capacity == 0 {
                return Err(ShuttleError::Config(format!(
                    "rate limit '{name}' must have a positive capacity"
                )));
            }
            if limit.window_secs <= 0.0 || !limit.window_secs.is_finite() {
                return Err(ShuttleError::Config(format!(
                    "rate limit '{name}' must have a positive window"
                )));
            }
        }

        if self.scheduling.default_trip_duration_minutes <= 0 {
            return Err(ShuttleError::Config(
                "scheduling.default_trip_duration_minutes must be positive".into(),
            ));
        }

        for provider in &self.providers {
            if provider.api_url.trim().is_empty() || provider.api_key.trim().is_empty() {
                return Err(ShuttleError::Config(format!(
                    "provider '{}' requires api_url and api_key",
                    provider.kind
                )));
            }
        }
        Ok(())
    }
}
