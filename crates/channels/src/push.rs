//! Firebase Cloud Messaging push notifications.

use crate::http::{self, Endpoint};
use crate::provider::{DeliveryReceipt, DeliveryStatus, NotificationProvider};
use async_trait::async_trait;
use shuttle_core::config::ProviderSettings;
use shuttle_core::{NotificationChannel, NotificationRequest, ProviderError, ProviderErrorKind};

const NAME: &str = "firebase_push";
const DEFAULT_TITLE: &str = "ShuttleBee Notification";

/// FCM legacy HTTP endpoint. The recipient is the device token.
pub struct FirebasePushProvider {
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl FirebasePushProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let endpoint = Endpoint::from_settings(settings);
        let client = endpoint.client(NAME)?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl NotificationProvider for FirebasePushProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Push
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.endpoint.validate(NAME)
    }

    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::json!({
            "to": request.recipient,
            "notification": {
                "title": request.meta("title").unwrap_or(DEFAULT_TITLE),
                "body": request.message,
                "sound": "default",
            },
            "data": {
                "trip_id": request.meta("trip_id"),
                "notification_type": request.meta("notification_type").unwrap_or("custom"),
                "click_action": "FLUTTER_NOTIFICATION_CLICK",
            },
            "priority": "high",
        }))
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError> {
        self.validate_config()?;
        self.validate_recipient(&request.recipient)?;
        let payload = self.format_payload(request)?;

        let reply = http::execute(
            NAME,
            self.client
                .post(self.endpoint.url("fcm/send"))
                .header("Authorization", format!("key={}", self.endpoint.api_key))
                .json(&payload),
        )
        .await?;

        // FCM reports per-token failures inside a 200 response.
        if reply.body.get("failure").and_then(|v| v.as_u64()).unwrap_or(0) > 0 {
            let reason = http::json_str(&reply.body, "/results/0/error").unwrap_or_else(|| "unknown".into());
            let kind = match reason.as_str() {
                "InvalidRegistration" | "NotRegistered" | "MissingRegistration" => ProviderErrorKind::InvalidRecipient,
                "Unavailable" | "InternalServerError" => ProviderErrorKind::Server,
                _ => ProviderErrorKind::Rejected,
            };
            tracing::warn!(reason = %reason, "FCM rejected push token");
            return Err(ProviderError::new(NAME, kind, reason));
        }

        let message_id = http::json_str(&reply.body, "/message_id")
            .or_else(|| http::json_str(&reply.body, "/results/0/message_id"));
        tracing::info!(message_id = ?message_id, "push notification sent");
        Ok(DeliveryReceipt::new(message_id, DeliveryStatus::Sent, reply.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults() {
        let settings = ProviderSettings::new(NAME, NotificationChannel::Push, "https://fcm.googleapis.com", "server-key");
        let provider = FirebasePushProvider::new(&settings).unwrap();
        let request = NotificationRequest::new(NotificationChannel::Push, "device-token", "Bus is 5 minutes away")
            .with_metadata("trip_id", "17");
        let payload = provider.format_payload(&request).unwrap();

        assert_eq!(payload["to"], "device-token");
        assert_eq!(payload["notification"]["title"], DEFAULT_TITLE);
        assert_eq!(payload["data"]["trip_id"], "17");
        assert_eq!(payload["data"]["notification_type"], "custom");
        assert_eq!(payload["priority"], "high");
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let settings = ProviderSettings::new(NAME, NotificationChannel::Push, "http://127.0.0.1:9", "server-key");
        let provider = FirebasePushProvider::new(&settings).unwrap();
        let request = NotificationRequest::new(NotificationChannel::Push, "  ", "hi");
        let err = provider.send(&request).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::InvalidRecipient);
    }
}
