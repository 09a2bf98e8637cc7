//! Generic JSON gateway used for custom SMS and WhatsApp endpoints.
//!
//! Posts `{to, message, api_key}` to the configured URL and reads the
//! message id from the `X-Message-Id` response header.

use crate::http::{self, Endpoint};
use crate::provider::{DeliveryReceipt, DeliveryStatus, NotificationProvider};
use async_trait::async_trait;
use shuttle_core::config::ProviderSettings;
use shuttle_core::{NotificationChannel, NotificationRequest, ProviderError};

pub struct GenericProvider {
    name: &'static str,
    channel: NotificationChannel,
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl GenericProvider {
    pub fn new(name: &'static str, channel: NotificationChannel, settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let endpoint = Endpoint::from_settings(settings);
        let client = endpoint.client(name)?;
        Ok(Self {
            name,
            channel,
            endpoint,
            client,
        })
    }

    pub fn sms(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::new("generic_sms", NotificationChannel::Sms, settings)
    }

    pub fn whatsapp(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::new("generic_whatsapp", NotificationChannel::WhatsApp, settings)
    }
}

#[async_trait]
impl NotificationProvider for GenericProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn channel(&self) -> NotificationChannel {
        self.channel
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.endpoint.validate(self.name)
    }

    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::json!({
            "to": request.recipient,
            "message": request.message,
            "api_key": self.endpoint.api_key,
        }))
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError> {
        self.validate_config()?;
        self.validate_recipient(&request.recipient)?;
        let payload = self.format_payload(request)?;

        let reply = http::execute(
            self.name,
            self.client.post(self.endpoint.url("")).json(&payload),
        )
        .await?;

        let message_id = reply.header("X-Message-Id");
        tracing::info!(
            provider = self.name,
            channel = %self.channel,
            message_id = ?message_id,
            "message sent via generic gateway"
        );
        Ok(DeliveryReceipt::new(message_id, DeliveryStatus::Sent, reply.body))
    }
}
