use chrono::NaiveDateTime;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type ShuttleResult<T> = Result<T, ShuttleError>;

#[derive(Error, Debug)]
pub enum ShuttleError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<ShuttleError>,
    },

    #[error("Rate limit exceeded for channel '{channel}', next token in {retry_after:?}")]
    RateLimitExceeded {
        channel: String,
        retry_after: Duration,
    },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(
        "Conflict detected: {resource} is already assigned to '{assignment_name}' (#{assignment_id}) from {start} to {end}"
    )]
    ConflictDetected {
        resource: String,
        assignment_id: u64,
        assignment_name: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ShuttleError {
    /// Whether retrying the failed operation can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShuttleError::Provider(e) => e.is_retryable(),
            ShuttleError::RateLimitExceeded { .. } => true,
            _ => false,
        }
    }
}

impl From<config::ConfigError> for ShuttleError {
    fn from(e: config::ConfigError) -> Self {
        ShuttleError::Config(e.to_string())
    }
}

/// Classification of a failed provider send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    Network,
    Timeout,
    Authentication,
    InvalidRecipient,
    RateLimited,
    Rejected,
    Server,
    Configuration,
    MalformedResponse,
}

impl ProviderErrorKind {
    /// Transient failures worth another attempt. Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Network
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::Server
        )
    }

    /// Map an HTTP status returned by a provider API.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProviderErrorKind::Authentication,
            429 => ProviderErrorKind::RateLimited,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::InvalidRecipient => "invalid_recipient",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Rejected => "rejected",
            ProviderErrorKind::Server => "server",
            ProviderErrorKind::Configuration => "configuration",
            ProviderErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a notification provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider} {kind} failure: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    /// HTTP status, when the provider answered at all.
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn from_status(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::from_status(status),
            message: body.into(),
            status: Some(status),
        }
    }

    pub fn configuration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Configuration, message)
    }

    pub fn invalid_recipient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::InvalidRecipient, message)
    }

    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProviderErrorKind::from_status(401), ProviderErrorKind::Authentication);
        assert_eq!(ProviderErrorKind::from_status(403), ProviderErrorKind::Authentication);
        assert_eq!(ProviderErrorKind::from_status(429), ProviderErrorKind::RateLimited);
        assert_eq!(ProviderErrorKind::from_status(503), ProviderErrorKind::Server);
        assert_eq!(ProviderErrorKind::from_status(400), ProviderErrorKind::Rejected);
        assert_eq!(ProviderErrorKind::from_status(422), ProviderErrorKind::Rejected);
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = ProviderError::new("waha", ProviderErrorKind::Timeout, "deadline elapsed");
        assert!(timeout.is_retryable());
        assert!(ShuttleError::from(timeout).is_retryable());

        let bad_number = ProviderError::invalid_recipient("twilio_sms", "not a phone number");
        assert!(!bad_number.is_retryable());
        assert!(!ShuttleError::from(bad_number).is_retryable());

        assert!(!ShuttleError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_retry_exhausted_keeps_source() {
        let last = ShuttleError::from(ProviderError::from_status("fcm", 502, "bad gateway"));
        let err = ShuttleError::RetryExhausted {
            attempts: 3,
            last: Box::new(last),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("bad gateway"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
