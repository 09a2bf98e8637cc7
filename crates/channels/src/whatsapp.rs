//! WhatsApp delivery through the Business Cloud API or a WAHA bridge.

use crate::http::{self, Endpoint};
use crate::provider::{DeliveryReceipt, DeliveryStatus, NotificationProvider};
use async_trait::async_trait;
use shuttle_core::config::ProviderSettings;
use shuttle_core::validation::clean_phone;
use shuttle_core::{NotificationChannel, NotificationRequest, ProviderError};

const BUSINESS: &str = "whatsapp_business";
const WAHA: &str = "waha";
const DEFAULT_WAHA_SESSION: &str = "default";

/// WhatsApp Business Cloud API. `api_key` is the bearer access token.
pub struct WhatsAppBusinessProvider {
    endpoint: Endpoint,
    phone_number_id: Option<String>,
    client: reqwest::Client,
}

impl WhatsAppBusinessProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let endpoint = Endpoint::from_settings(settings);
        let client = endpoint.client(BUSINESS)?;
        Ok(Self {
            endpoint,
            phone_number_id: settings.phone_number_id.clone().filter(|s| !s.trim().is_empty()),
            client,
        })
    }

    fn phone_number_id(&self) -> Result<&str, ProviderError> {
        self.phone_number_id
            .as_deref()
            .ok_or_else(|| ProviderError::configuration(BUSINESS, "WhatsApp phone_number_id is not configured"))
    }
}

#[async_trait]
impl NotificationProvider for WhatsAppBusinessProvider {
    fn name(&self) -> &str {
        BUSINESS
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::WhatsApp
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.endpoint.validate(BUSINESS)?;
        self.phone_number_id().map(|_| ())
    }

    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": clean_phone(&request.recipient),
            "type": "text",
            "text": {
                "preview_url": false,
                "body": request.message,
            }
        }))
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError> {
        self.validate_config()?;
        self.validate_recipient(&request.recipient)?;
        let payload = self.format_payload(request)?;
        let url = self.endpoint.url(&format!("{}/messages", self.phone_number_id()?));

        let reply = http::execute(
            BUSINESS,
            self.client
                .post(url)
                .bearer_auth(&self.endpoint.api_key)
                .json(&payload),
        )
        .await?;

        let message_id = http::require_str(BUSINESS, &reply.body, "/messages/0/id")?;
        tracing::info!(message_id = %message_id, "WhatsApp message accepted");
        Ok(DeliveryReceipt::new(Some(message_id), DeliveryStatus::Sent, reply.body))
    }
}

/// WAHA (WhatsApp HTTP API) bridge. `api_key` goes in `X-Api-Key`.
pub struct WahaProvider {
    endpoint: Endpoint,
    session: String,
    client: reqwest::Client,
}

impl WahaProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let endpoint = Endpoint::from_settings(settings);
        let client = endpoint.client(WAHA)?;
        let session = settings
            .session
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WAHA_SESSION.to_string());
        Ok(Self {
            endpoint,
            session,
            client,
        })
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// `<digits>@c.us` chat id for a phone number.
    pub fn chat_id(phone: &str) -> String {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        format!("{digits}@c.us")
    }

    /// WAHA reports the id either as a string or as `{ "_serialized": ... }`.
    fn message_id(body: &serde_json::Value) -> Option<String> {
        http::json_str(body, "/id").or_else(|| http::json_str(body, "/id/_serialized"))
    }
}

#[async_trait]
impl NotificationProvider for WahaProvider {
    fn name(&self) -> &str {
        WAHA
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::WhatsApp
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.endpoint.validate(WAHA)
    }

    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError> {
        let mut payload = serde_json::json!({
            "chatId": Self::chat_id(&request.recipient),
            "text": request.message,
            "session": self.session,
            "linkPreview": true,
        });
        if let Some(reply_to) = request.meta("reply_to") {
            payload["reply_to"] = serde_json::Value::String(reply_to.to_string());
        }
        Ok(payload)
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError> {
        self.validate_config()?;
        self.validate_recipient(&request.recipient)?;
        let payload = self.format_payload(request)?;

        let reply = http::execute(
            WAHA,
            self.client
                .post(self.endpoint.url("api/sendText"))
                .header("X-Api-Key", &self.endpoint.api_key)
                .json(&payload),
        )
        .await?;

        let message_id = Self::message_id(&reply.body);
        tracing::info!(
            session = %self.session,
            message_id = ?message_id,
            "WhatsApp message sent via WAHA"
        );
        Ok(DeliveryReceipt::new(message_id, DeliveryStatus::Sent, reply.body))
    }
}
