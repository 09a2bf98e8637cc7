//! Twilio SMS provider: form-encoded send with basic auth, plus segment
//! calculation for message bodies.

use crate::http::{self, Endpoint};
use crate::provider::{DeliveryReceipt, DeliveryStatus, NotificationProvider};
use async_trait::async_trait;
use shuttle_core::config::ProviderSettings;
use shuttle_core::{NotificationChannel, NotificationRequest, ProviderError};

const NAME: &str = "twilio_sms";

/// Twilio Messages API. `api_key` is the auth token.
pub struct TwilioSmsProvider {
    endpoint: Endpoint,
    account_sid: Option<String>,
    from_number: Option<String>,
    client: reqwest::Client,
}

impl TwilioSmsProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let endpoint = Endpoint::from_settings(settings);
        let client = endpoint.client(NAME)?;
        Ok(Self {
            endpoint,
            account_sid: settings.account_sid.clone().filter(|s| !s.trim().is_empty()),
            from_number: settings.from_number.clone().filter(|s| !s.trim().is_empty()),
            client,
        })
    }

    fn form_fields(&self, request: &NotificationRequest) -> Result<[(&'static str, String); 3], ProviderError> {
        let from = self
            .from_number
            .clone()
            .ok_or_else(|| ProviderError::configuration(NAME, "Twilio from_number is not configured"))?;
        Ok([
            ("From", from),
            ("To", request.recipient.clone()),
            ("Body", request.message.clone()),
        ])
    }

    /// Number of SMS segments needed for `body`.
    /// GSM 7-bit: 160 chars single, 153 per part. UCS-2: 70 single, 67 per part.
    pub fn calculate_segments(body: &str) -> u32 {
        if body.is_empty() {
            return 1;
        }
        let char_count = body.chars().count() as u32;
        let (single, multi) = if body.chars().all(is_gsm_7bit) {
            (160, 153)
        } else {
            (70, 67)
        };
        if char_count <= single {
            1
        } else {
            char_count.div_ceil(multi)
        }
    }
}

#[async_trait]
impl NotificationProvider for TwilioSmsProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Sms
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.endpoint.validate(NAME)?;
        if self.account_sid.is_none() {
            return Err(ProviderError::configuration(NAME, "Twilio account_sid is not configured"));
        }
        if self.from_number.is_none() {
            return Err(ProviderError::configuration(NAME, "Twilio from_number is not configured"));
        }
        Ok(())
    }

    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError> {
        let fields = self.form_fields(request)?;
        let map: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();
        Ok(serde_json::Value::Object(map))
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError> {
        self.validate_config()?;
        self.validate_recipient(&request.recipient)?;
        let fields = self.form_fields(request)?;
        let account_sid = self.account_sid.as_deref().unwrap_or_default();

        let reply = http::execute(
            NAME,
            self.client
                .post(self.endpoint.url("Messages.json"))
                .basic_auth(account_sid, Some(&self.endpoint.api_key))
                .form(&fields),
        )
        .await?;

        let sid = http::require_str(NAME, &reply.body, "/sid")?;
        let status = http::json_str(&reply.body, "/status")
            .map(|s| DeliveryStatus::from_provider(&s))
            .unwrap_or(DeliveryStatus::Queued);

        tracing::info!(
            sid = %sid,
            segments = Self::calculate_segments(&request.message),
            status = ?status,
            "SMS accepted by Twilio"
        );
        metrics::counter!("sms.segments").increment(u64::from(Self::calculate_segments(&request.message)));

        Ok(DeliveryReceipt::new(Some(sid), status, reply.body))
    }
}

/// Check whether a character is in the GSM 7-bit default alphabet.
fn is_gsm_7bit(c: char) -> bool {
    matches!(c,
        'A'..='Z' | 'a'..='z' | '0'..='9'
        | ' ' | '!' | '"' | '#' | '$' | '%' | '&' | '\'' | '(' | ')'
        | '*' | '+' | ',' | '-' | '.' | '/' | ':' | ';' | '<' | '='
        | '>' | '?' | '@' | '_' | '\n' | '\r'
        | '\u{00A3}' | '\u{00A5}' | '\u{00E8}' | '\u{00E9}' | '\u{00F9}'
        | '\u{00EC}' | '\u{00F2}' | '\u{00C7}' | '\u{00D8}' | '\u{00F8}'
        | '\u{00C5}' | '\u{00E5}' | '\u{0394}' | '\u{03A6}' | '\u{0393}'
        | '\u{039B}' | '\u{03A9}' | '\u{03A0}' | '\u{03A8}' | '\u{03A3}'
        | '\u{0398}' | '\u{039E}' | '\u{00C6}' | '\u{00E6}' | '\u{00DF}'
        | '\u{00C9}' | '\u{00A4}' | '\u{00A1}' | '\u{00BF}' | '\u{00C4}'
        | '\u{00D6}' | '\u{00D1}' | '\u{00DC}' | '\u{00A7}' | '\u{00E4}'
        | '\u{00F6}' | '\u{00F1}' | '\u{00FC}' | '\u{00E0}'
        // extension table, two septets each
        | '{' | '}' | '[' | ']' | '~' | '\\' | '^' | '|' | '\u{20AC}'
    )
}
