//! SendGrid email delivery.
//!
//! Request metadata feeds the envelope: `subject` sets the subject line,
//! `html` adds an HTML part, and every other entry is passed through as a
//! SendGrid custom arg so webhook events can be matched back to trips.

use crate::http::{self, Endpoint};
use crate::provider::{DeliveryReceipt, DeliveryStatus, NotificationProvider};
use async_trait::async_trait;
use shuttle_core::config::ProviderSettings;
use shuttle_core::{NotificationChannel, NotificationRequest, ProviderError};

const NAME: &str = "sendgrid_email";
const DEFAULT_SUBJECT: &str = "ShuttleBee Notification";

pub struct SendGridProvider {
    endpoint: Endpoint,
    from_email: Option<String>,
    from_name: Option<String>,
    client: reqwest::Client,
}

impl SendGridProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let endpoint = Endpoint::from_settings(settings);
        let client = endpoint.client(NAME)?;
        tracing::info!(from = ?settings.from_email, "SendGrid provider initialized");
        Ok(Self {
            endpoint,
            from_email: settings.from_email.clone().filter(|s| !s.trim().is_empty()),
            from_name: settings.from_name.clone(),
            client,
        })
    }
}

#[async_trait]
impl NotificationProvider for SendGridProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.endpoint.validate(NAME)?;
        match &self.from_email {
            Some(_) => Ok(()),
            None => Err(ProviderError::configuration(NAME, "SendGrid from_email is not configured")),
        }
    }

    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError> {
        let from_email = self
            .from_email
            .as_deref()
            .ok_or_else(|| ProviderError::configuration(NAME, "SendGrid from_email is not configured"))?;

        let mut content = vec![serde_json::json!({
            "type": "text/plain",
            "value": request.message,
        })];
        if let Some(html) = request.meta("html") {
            content.push(serde_json::json!({"type": "text/html", "value": html}));
        }

        let custom_args: serde_json::Map<String, serde_json::Value> = request
            .metadata
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "subject" | "html"))
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        let mut from = serde_json::json!({"email": from_email});
        if let Some(name) = &self.from_name {
            from["name"] = serde_json::Value::String(name.clone());
        }

        Ok(serde_json::json!({
            "personalizations": [{
                "to": [{"email": request.recipient}],
                "custom_args": custom_args,
            }],
            "from": from,
            "subject": request.meta("subject").unwrap_or(DEFAULT_SUBJECT),
            "content": content,
        }))
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError> {
        self.validate_config()?;
        self.validate_recipient(&request.recipient)?;
        let payload = self.format_payload(request)?;

        let reply = http::execute(
            NAME,
            self.client
                .post(self.endpoint.url("v3/mail/send"))
                .bearer_auth(&self.endpoint.api_key)
                .json(&payload),
        )
        .await?;

        // SendGrid answers 202 with an empty body.
        let message_id = reply.header("X-Message-Id");
        tracing::debug!(to = %request.recipient, message_id = ?message_id, "email queued via SendGrid");
        Ok(DeliveryReceipt::new(message_id, DeliveryStatus::Queued, reply.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> SendGridProvider {
        let mut settings = ProviderSettings::new(NAME, NotificationChannel::Email, "https://api.sendgrid.com", "SG.key");
        settings.from_email = Some("trips@shuttlebee.example".into());
        settings.from_name = Some("ShuttleBee".into());
        SendGridProvider::new(&settings).unwrap()
    }

    #[test]
    fn test_payload_envelope() {
        let request = NotificationRequest::new(NotificationChannel::Email, "parent@example.com", "Trip cancelled")
            .with_metadata("subject", "Trip update")
            .with_metadata("trip_id", "42");
        let payload = provider().format_payload(&request).unwrap();

        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "parent@example.com");
        assert_eq!(payload["personalizations"][0]["custom_args"]["trip_id"], "42");
        assert!(payload["personalizations"][0]["custom_args"].get("subject").is_none());
        assert_eq!(payload["from"]["name"], "ShuttleBee");
        assert_eq!(payload["subject"], "Trip update");
        assert_eq!(payload["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_default_subject_and_html_part() {
        let request = NotificationRequest::new(NotificationChannel::Email, "parent@example.com", "plain")
            .with_metadata("html", "<p>rich</p>");
        let payload = provider().format_payload(&request).unwrap();
        assert_eq!(payload["subject"], DEFAULT_SUBJECT);
        assert_eq!(payload["content"][1]["type"], "text/html");
    }

    #[test]
    fn test_requires_from_email() {
        let settings = ProviderSettings::new(NAME, NotificationChannel::Email, "https://api.sendgrid.com", "SG.key");
        let provider = SendGridProvider::new(&settings).unwrap();
        assert!(provider.validate_config().is_err());
    }
}
