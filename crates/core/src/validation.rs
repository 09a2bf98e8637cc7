//! Input validation shared by the notification and scheduling layers.
//!
//! Every check returns `ShuttleError::Validation` with a message suitable for
//! logging; user-facing wording is the caller's business.

use crate::error::{ShuttleError, ShuttleResult};
use crate::types::NotificationChannel;
use regex::Regex;
use std::sync::OnceLock;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email regex")
    })
}

/// Strip separators and a leading `+`, leaving the dialable digits.
pub fn clean_phone(phone: &str) -> String {
    let trimmed: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '\t'))
        .collect();
    trimmed.strip_prefix('+').unwrap_or(&trimmed).to_string()
}

/// A phone number is valid when it reduces to 7-15 digits.
pub fn validate_phone(phone: &str) -> ShuttleResult<()> {
    if phone.trim().is_empty() {
        return Err(ShuttleError::Validation("Phone number is required".into()));
    }
    let digits = clean_phone(phone);
    let ok = (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    if !ok {
        return Err(ShuttleError::Validation(format!(
            "Invalid phone number format: {phone}. Expected 7-15 digits"
        )));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> ShuttleResult<()> {
    if email.trim().is_empty() {
        return Err(ShuttleError::Validation("Email address is required".into()));
    }
    if !email_pattern().is_match(email) {
        return Err(ShuttleError::Validation(format!("Invalid email format: {email}")));
    }
    Ok(())
}

/// Latitude in [-90, 90], longitude in [-180, 180]. Both failures are reported together.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> ShuttleResult<()> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(ShuttleError::Validation(
            "Latitude and longitude must be numeric values".into(),
        ));
    }

    let mut errors = Vec::new();
    if !(-90.0..=90.0).contains(&latitude) {
        errors.push("Latitude must be between -90 and 90");
    }
    if !(-180.0..=180.0).contains(&longitude) {
        errors.push("Longitude must be between -180 and 180");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ShuttleError::Validation(errors.join("; ")))
    }
}

/// Check that the contact detail a channel needs is present and well formed.
pub fn validate_contact_info(
    channel: NotificationChannel,
    phone: Option<&str>,
    email: Option<&str>,
) -> ShuttleResult<()> {
    match channel {
        NotificationChannel::Sms | NotificationChannel::WhatsApp => match phone {
            Some(p) if !p.trim().is_empty() => validate_phone(p),
            _ => Err(ShuttleError::Validation(format!(
                "Phone number is required for {} notifications",
                channel.display_name()
            ))),
        },
        NotificationChannel::Email => match email {
            Some(e) if !e.trim().is_empty() => validate_email(e),
            _ => Err(ShuttleError::Validation(
                "Email address is required for email notifications".into(),
            )),
        },
        NotificationChannel::Push => Ok(()),
    }
}

/// Validate a bare recipient string for the given channel.
pub fn validate_recipient(channel: NotificationChannel, recipient: &str) -> ShuttleResult<()> {
    match channel {
        NotificationChannel::Sms | NotificationChannel::WhatsApp => validate_phone(recipient),
        NotificationChannel::Email => validate_email(recipient),
        NotificationChannel::Push => {
            if recipient.trim().is_empty() {
                Err(ShuttleError::Validation("Push token is required".into()))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_phone() {
        assert_eq!(clean_phone("+212 (661) 23-45-67"), "212661234567");
        assert_eq!(clean_phone("0661234567"), "0661234567");
        assert_eq!(clean_phone(""), "");
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+212 661 234 567").is_ok());
        assert!(validate_phone("1234567").is_ok());
        assert!(validate_phone("123456").is_err());
        assert!(validate_phone("1234567890123456").is_err());
        assert!(validate_phone("12345abc90").is_err());
        assert!(validate_phone("   ").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("driver@shuttlebee.ma").is_ok());
        assert!(validate_email("first.last+trip@school.co.uk").is_ok());
        assert!(validate_email("no-at-sign.com").is_err());
        assert!(validate_email("user@host").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(33.5731, -7.5898).is_ok());
        assert!(validate_coordinates(90.0, 180.0).is_ok());

        let err = validate_coordinates(91.0, -181.0).unwrap_err().to_string();
        assert!(err.contains("Latitude"));
        assert!(err.contains("Longitude"));

        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_validate_contact_info() {
        assert!(validate_contact_info(NotificationChannel::Sms, Some("+212661234567"), None).is_ok());
        assert!(validate_contact_info(NotificationChannel::WhatsApp, None, None).is_err());
        assert!(validate_contact_info(NotificationChannel::Email, None, Some("a@b.io")).is_ok());
        assert!(validate_contact_info(NotificationChannel::Email, Some("+212661234567"), None).is_err());
        assert!(validate_contact_info(NotificationChannel::Push, None, None).is_ok());
    }

    #[test]
    fn test_validate_recipient() {
        assert!(validate_recipient(NotificationChannel::Push, "fcm:abc").is_ok());
        assert!(validate_recipient(NotificationChannel::Push, "").is_err());
        assert!(validate_recipient(NotificationChannel::Email, "parent@example.com").is_ok());
        assert!(validate_recipient(NotificationChannel::Sms, "parent@example.com").is_err());
    }
}
