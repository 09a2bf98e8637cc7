//! Notification channels: provider adapters for SMS, WhatsApp, push and
//! email behind one send interface, plus localized message templates.

pub mod email;
pub mod factory;
pub mod generic;
pub mod http;
pub mod provider;
pub mod push;
pub mod sms;
pub mod templates;
pub mod whatsapp;

pub use factory::{create_provider, Provider, ProviderKind};
pub use provider::{DeliveryReceipt, DeliveryStatus, NotificationProvider};
pub use templates::{LanguageChain, MessageTemplate, NotificationType, TemplateCatalog};
