//! Shared building blocks for the ShuttleBee delivery helpers: errors,
//! configuration, channel and request types, validation and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use error::{ProviderError, ProviderErrorKind, ShuttleError, ShuttleResult};
pub use types::{NotificationChannel, NotificationRequest, NotificationStatus};
