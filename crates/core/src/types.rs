use crate::error::{ShuttleError, ShuttleResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Outbound notification channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Sms,
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Push,
    Email,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 4] = [
        NotificationChannel::Sms,
        NotificationChannel::WhatsApp,
        NotificationChannel::Push,
        NotificationChannel::Email,
    ];

    /// Key used for rate-limit buckets and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Sms => "sms",
            NotificationChannel::WhatsApp => "whatsapp",
            NotificationChannel::Push => "push",
            NotificationChannel::Email => "email",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NotificationChannel::Sms => "SMS",
            NotificationChannel::WhatsApp => "WhatsApp",
            NotificationChannel::Push => "Push Notification",
            NotificationChannel::Email => "Email",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = ShuttleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(NotificationChannel::Sms),
            "whatsapp" => Ok(NotificationChannel::WhatsApp),
            "push" => Ok(NotificationChannel::Push),
            "email" => Ok(NotificationChannel::Email),
            other => Err(ShuttleError::Validation(format!(
                "Unknown notification channel: {other}"
            ))),
        }
    }
}

/// A single outbound message, built per send and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipient: String,
    pub message: String,
    pub channel: NotificationChannel,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NotificationRequest {
    pub fn new(
        channel: NotificationChannel,
        recipient: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            message: message.into(),
            channel,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Lifecycle of a notification as tracked by the caller.
///
/// `pending -> sent -> delivered -> read`, with `pending | sent -> failed`.
/// Transitions are driven by provider webhooks or polling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Sent, Delivered) | (Delivered, Read) | (Pending, Failed) | (Sent, Failed)
        )
    }

    /// Move to `next`, rejecting edges outside the lifecycle.
    pub fn transition(self, next: NotificationStatus) -> ShuttleResult<NotificationStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ShuttleError::Validation(format!(
                "Invalid notification status transition: {self:?} -> {next:?}"
            )))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationStatus::Read | NotificationStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse_and_serde() {
        assert_eq!("WhatsApp".parse::<NotificationChannel>().unwrap(), NotificationChannel::WhatsApp);
        assert_eq!(" sms ".parse::<NotificationChannel>().unwrap(), NotificationChannel::Sms);
        assert!("fax".parse::<NotificationChannel>().is_err());

        let json = serde_json::to_string(&NotificationChannel::WhatsApp).unwrap();
        assert_eq!(json, "\"whatsapp\"");
        for channel in NotificationChannel::ALL {
            assert_eq!(channel.as_str().parse::<NotificationChannel>().unwrap(), channel);
        }
    }

    #[test]
    fn test_request_metadata() {
        let req = NotificationRequest::new(NotificationChannel::Push, "fcm-token", "Bus arriving")
            .with_metadata("title", "ShuttleBee")
            .with_metadata("trip_id", "42");
        assert_eq!(req.meta("trip_id"), Some("42"));
        assert_eq!(req.meta("missing"), None);
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let status = NotificationStatus::Pending
            .transition(NotificationStatus::Sent)
            .and_then(|s| s.transition(NotificationStatus::Delivered))
            .and_then(|s| s.transition(NotificationStatus::Read))
            .unwrap();
        assert_eq!(status, NotificationStatus::Read);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_lifecycle_failure_edges() {
        assert!(NotificationStatus::Pending.can_transition_to(NotificationStatus::Failed));
        assert!(NotificationStatus::Sent.can_transition_to(NotificationStatus::Failed));
        assert!(!NotificationStatus::Delivered.can_transition_to(NotificationStatus::Failed));
        assert!(!NotificationStatus::Pending.can_transition_to(NotificationStatus::Read));
        assert!(NotificationStatus::Read.transition(NotificationStatus::Sent).is_err());
    }
}
