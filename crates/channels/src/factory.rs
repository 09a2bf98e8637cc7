//! Provider selection over a closed set of adapter kinds.

use crate::email::SendGridProvider;
use crate::generic::GenericProvider;
use crate::provider::{DeliveryReceipt, NotificationProvider};
use crate::push::FirebasePushProvider;
use crate::sms::TwilioSmsProvider;
use crate::whatsapp::{WahaProvider, WhatsAppBusinessProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shuttle_core::config::ProviderSettings;
use shuttle_core::{NotificationChannel, NotificationRequest, ProviderError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    TwilioSms,
    GenericSms,
    WhatsappBusiness,
    Waha,
    GenericWhatsapp,
    FirebasePush,
    SendgridEmail,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::TwilioSms,
        ProviderKind::GenericSms,
        ProviderKind::WhatsappBusiness,
        ProviderKind::Waha,
        ProviderKind::GenericWhatsapp,
        ProviderKind::FirebasePush,
        ProviderKind::SendgridEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::TwilioSms => "twilio_sms",
            ProviderKind::GenericSms => "generic_sms",
            ProviderKind::WhatsappBusiness => "whatsapp_business",
            ProviderKind::Waha => "waha",
            ProviderKind::GenericWhatsapp => "generic_whatsapp",
            ProviderKind::FirebasePush => "firebase_push",
            ProviderKind::SendgridEmail => "sendgrid_email",
        }
    }

    pub fn channel(&self) -> NotificationChannel {
        match self {
            ProviderKind::TwilioSms | ProviderKind::GenericSms => NotificationChannel::Sms,
            ProviderKind::WhatsappBusiness | ProviderKind::Waha | ProviderKind::GenericWhatsapp => {
                NotificationChannel::WhatsApp
            }
            ProviderKind::FirebasePush => NotificationChannel::Push,
            ProviderKind::SendgridEmail => NotificationChannel::Email,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == tag)
            .ok_or_else(|| {
                let available: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
                ProviderError::configuration(
                    "factory",
                    format!("Unknown provider type: {s}. Available: {}", available.join(", ")),
                )
            })
    }
}

/// Any supported adapter, plus caller-supplied implementations.
pub enum Provider {
    TwilioSms(TwilioSmsProvider),
    GenericSms(GenericProvider),
    WhatsAppBusiness(WhatsAppBusinessProvider),
    Waha(WahaProvider),
    GenericWhatsApp(GenericProvider),
    FirebasePush(FirebasePushProvider),
    SendGridEmail(SendGridProvider),
    Custom(Arc<dyn NotificationProvider>),
}

impl Provider {
    pub fn custom(provider: Arc<dyn NotificationProvider>) -> Self {
        Provider::Custom(provider)
    }

    fn inner(&self) -> &dyn NotificationProvider {
        match self {
            Provider::TwilioSms(p) => p,
            Provider::GenericSms(p) => p,
            Provider::WhatsAppBusiness(p) => p,
            Provider::Waha(p) => p,
            Provider::GenericWhatsApp(p) => p,
            Provider::FirebasePush(p) => p,
            Provider::SendGridEmail(p) => p,
            Provider::Custom(p) => p.as_ref(),
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("channel", &self.channel())
            .finish()
    }
}

#[async_trait]
impl NotificationProvider for Provider {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn channel(&self) -> NotificationChannel {
        self.inner().channel()
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.inner().validate_config()
    }

    fn validate_recipient(&self, recipient: &str) -> Result<(), ProviderError> {
        self.inner().validate_recipient(recipient)
    }

    fn format_payload(&self, request: &NotificationRequest) -> Result<serde_json::Value, ProviderError> {
        self.inner().format_payload(request)
    }

    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, ProviderError> {
        self.inner().send(request).await
    }
}

/// Build the adapter for `kind` from its transport settings.
pub fn create_provider(kind: ProviderKind, settings: &ProviderSettings) -> Result<Provider, ProviderError> {
    if settings.channel != kind.channel() {
        return Err(ProviderError::configuration(
            kind.as_str(),
            format!(
                "provider serves {} but is configured for {}",
                kind.channel(),
                settings.channel
            ),
        ));
    }

    let provider = match kind {
        ProviderKind::TwilioSms => Provider::TwilioSms(TwilioSmsProvider::new(settings)?),
        ProviderKind::GenericSms => Provider::GenericSms(GenericProvider::sms(settings)?),
        ProviderKind::WhatsappBusiness => Provider::WhatsAppBusiness(WhatsAppBusinessProvider::new(settings)?),
        ProviderKind::Waha => Provider::Waha(WahaProvider::new(settings)?),
        ProviderKind::GenericWhatsapp => Provider::GenericWhatsApp(GenericProvider::whatsapp(settings)?),
        ProviderKind::FirebasePush => Provider::FirebasePush(FirebasePushProvider::new(settings)?),
        ProviderKind::SendgridEmail => Provider::SendGridEmail(SendGridProvider::new(settings)?),
    };
    tracing::debug!(provider = %kind, channel = %kind.channel(), "notification provider created");
    Ok(provider)
}

/// Parse `settings.kind` and build the adapter.
pub fn provider_from_settings(settings: &ProviderSettings) -> Result<Provider, ProviderError> {
    create_provider(settings.kind.parse()?, settings)
}
