//! ShuttleBee delivery helpers.
//!
//! Wires the standalone components together the way the trip and
//! notification layers use them: validate, check conflicts before
//! scheduling, take a rate-limit token before sending, retry transient
//! provider failures, and hand the message to the channel's provider.

pub mod app;
pub mod dispatcher;

pub use app::{Notice, ShuttleBee};
pub use dispatcher::NotificationDispatcher;

pub use shuttle_channels::{DeliveryReceipt, NotificationType, Provider, ProviderKind};
pub use shuttle_core::{AppConfig, NotificationChannel, NotificationRequest, ShuttleError, ShuttleResult};
