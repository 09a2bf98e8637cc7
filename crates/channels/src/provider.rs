//! The provider capability every channel adapter implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shuttle_core::validation::validate_recipient;
use shuttle_core::{NotificationChannel, NotificationRequest, ProviderError};

/// Provider-side status of an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Queued,
}

impl DeliveryStatus {
    /// Map a provider's textual status. Unknown values count as sent.
    pub fn from_provider(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "queued" | "accepted" | "scheduled" | "sending" | "pending" => DeliveryStatus::Queued,
            "failed" | "undelivered" | "rejected" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Sent,
        }
    }
}

/// What a provider returned for one send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Absent when the provider does not report one.
    pub provider_message_id: Option<String>,
    pub status: DeliveryStatus,
    pub raw_response: serde_json::Value,
}

impl DeliveryReceipt {
    pub fn new(provider_message_id: Option<String>, status: DeliveryStatus, raw_response: serde_json::Value) -> Self {
        Self {
            provider_message_id,
            status,
            raw_response,
        }
    }
}

/// A transport for one notification channel.
///
/// Implementations hold only their transport configuration and are safe to
/// share across concurrent sends.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Stable identifier used in logs, metrics and errors.
    fn name(&self) -> &str;

    fn channel(&self) -> NotificationChannel;

    /// Check endpoint, credentials and provider-specific fields.
    fn validate_config(&self) -> Result<(), ProviderError>;

    /// Reject recipients the channel cannot address before any network call.
    fn validate_recipient(&self, recipient: &str) -> Result<(), ProviderError> {
        validate_recipient(self.channel(), recipient)
            .map_err(|e| ProviderError::invalid_recipient(self.name(), e.to_string()))
    }

    /// Request body as the provider API expects it.
    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError>;

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(DeliveryStatus::from_provider("queued"), DeliveryStatus::Queued);
        assert_eq!(DeliveryStatus::from_provider("ACCEPTED"), DeliveryStatus::Queued);
        assert_eq!(DeliveryStatus::from_provider("undelivered"), DeliveryStatus::Failed);
        assert_eq!(DeliveryStatus::from_provider("delivered"), DeliveryStatus::Sent);
        assert_eq!(DeliveryStatus::from_provider("whatever"), DeliveryStatus::Sent);
    }

    #[test]
    fn test_receipt_serializes_lowercase_status() {
        let receipt = DeliveryReceipt::new(Some("SM1".into()), DeliveryStatus::Queued, serde_json::Value::Null);
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["provider_message_id"], "SM1");
    }
}
