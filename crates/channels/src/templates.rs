//! Localized message templates.
//!
//! A template is chosen by notification type, channel and a language
//! fallback chain: passenger preference, then the locale detected from the
//! message context, then the company language, then the system default.
//! The first language that has a matching active template wins; within a
//! language a default template beats a plain active one.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shuttle_core::config::TemplateSettings;
use shuttle_core::{NotificationChannel, ShuttleError, ShuttleResult};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

/// Placeholders every template may use, with their fallback values.
pub const STANDARD_PLACEHOLDERS: [(&str, &str); 11] = [
    ("passenger_name", ""),
    ("driver_name", ""),
    ("vehicle_name", ""),
    ("vehicle_plate", ""),
    ("stop_name", ""),
    ("trip_name", ""),
    ("trip_date", ""),
    ("trip_time", ""),
    ("eta", "10"),
    ("company_name", ""),
    ("company_phone", ""),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Approaching,
    Arrived,
    TripStarted,
    TripEnded,
    Cancelled,
    Reminder,
    Custom,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Approaching => "approaching",
            NotificationType::Arrived => "arrived",
            NotificationType::TripStarted => "trip_started",
            NotificationType::TripEnded => "trip_ended",
            NotificationType::Cancelled => "cancelled",
            NotificationType::Reminder => "reminder",
            NotificationType::Custom => "custom",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = ShuttleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approaching" => Ok(NotificationType::Approaching),
            "arrived" => Ok(NotificationType::Arrived),
            "trip_started" => Ok(NotificationType::TripStarted),
            "trip_ended" => Ok(NotificationType::TripEnded),
            "cancelled" => Ok(NotificationType::Cancelled),
            "reminder" => Ok(NotificationType::Reminder),
            "custom" => Ok(NotificationType::Custom),
            other => Err(ShuttleError::Validation(format!("Unknown notification type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub notification_type: NotificationType,
    /// `None` applies to every channel.
    pub channel: Option<NotificationChannel>,
    pub language: String,
    pub subject: Option<String>,
    pub body: String,
    pub is_active: bool,
    pub is_default: bool,
    /// Lower sorts first among otherwise equal candidates.
    pub sequence: i32,
}

impl MessageTemplate {
    pub fn new(
        name: impl Into<String>,
        notification_type: NotificationType,
        language: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let language: String = language.into();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            notification_type,
            channel: None,
            language: normalize_language(&language).unwrap_or_default(),
            subject: None,
            body: body.into(),
            is_active: true,
            is_default: false,
            sequence: 10,
        }
    }

    pub fn for_channel(mut self, channel: NotificationChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    fn serves(&self, channel: NotificationChannel) -> bool {
        self.channel.map_or(true, |c| c == channel)
    }

    /// Two templates compete for the same default slot when their channels
    /// are equal or either one covers all channels.
    fn shares_slot_with(&self, other: &MessageTemplate) -> bool {
        self.notification_type == other.notification_type
            && self.language == other.language
            && match (self.channel, other.channel) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    /// Substitute `{placeholder}`s. Standard placeholders default per
    /// [`STANDARD_PLACEHOLDERS`]; `{{` and `}}` are literal braces. A
    /// placeholder with no value leaves the body unrendered.
    pub fn render(&self, values: &HashMap<String, String>) -> String {
        match substitute(&self.body, |key| {
            values.get(key).map(String::as_str).or_else(|| {
                STANDARD_PLACEHOLDERS
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, fallback)| *fallback)
            })
        }) {
            Ok(rendered) => rendered,
            Err(missing) => {
                warn!(template = %self.name, placeholder = %missing, "missing placeholder in template");
                self.body.clone()
            }
        }
    }
}

/// Expand `{key}` using `lookup`; returns the first unresolved key on failure.
fn substitute<'a>(body: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(format!("{{{key}"));
                }
                out.push_str(lookup(key.trim()).ok_or(key)?);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// `en_US`, `EN-us` and `en` all become `en`. Empty input yields `None`.
pub fn normalize_language(code: &str) -> Option<String> {
    let primary = code.trim().split(['_', '-']).next().unwrap_or_default();
    if primary.is_empty() {
        None
    } else {
        Some(primary.to_ascii_lowercase())
    }
}

/// Guess a message's language from its script: Arabic letters mean `ar`,
/// French accented letters mean `fr`, other Latin text means `en`.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let mut latin = false;
    let mut french = false;
    for c in text.chars() {
        match c {
            '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' => return Some("ar"),
            'à' | 'â' | 'ç' | 'é' | 'è' | 'ê' | 'ë' | 'î' | 'ï' | 'ô' | 'ù' | 'û' | 'œ' => french = true,
            c if c.is_ascii_alphabetic() => latin = true,
            _ => {}
        }
    }
    if french {
        Some("fr")
    } else if latin {
        Some("en")
    } else {
        None
    }
}

/// Ordered, de-duplicated list of languages to try.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageChain {
    languages: Vec<String>,
}

impl LanguageChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `code` unless it is empty or already present.
    pub fn then(mut self, code: Option<&str>) -> Self {
        if let Some(lang) = code.and_then(normalize_language) {
            if !self.languages.contains(&lang) {
                self.languages.push(lang);
            }
        }
        self
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }
}

/// In-memory template store with default-slot enforcement.
pub struct TemplateCatalog {
    templates: DashMap<Uuid, MessageTemplate>,
    /// Held across the check and the write of any default-slot change.
    slot_guard: Mutex<()>,
    company_language: Option<String>,
    default_language: String,
}

impl TemplateCatalog {
    pub fn new(default_language: &str) -> Self {
        Self {
            templates: DashMap::new(),
            slot_guard: Mutex::new(()),
            company_language: None,
            default_language: normalize_language(default_language).unwrap_or_else(|| "ar".to_string()),
        }
    }

    pub fn from_settings(settings: &TemplateSettings) -> Self {
        let mut catalog = Self::new(&settings.default_language);
        catalog.company_language = settings.company_language.as_deref().and_then(normalize_language);
        catalog
    }

    /// Passenger preference, then the detected locale, then the company
    /// language, then the system default.
    pub fn language_chain(&self, passenger: Option<&str>, detected: Option<&str>) -> LanguageChain {
        LanguageChain::new()
            .then(passenger)
            .then(detected)
            .then(self.company_language.as_deref())
            .then(Some(self.default_language.as_str()))
    }

    /// Store a template. A second default for the same type, channel and
    /// language is rejected.
    pub fn insert(&self, template: MessageTemplate) -> ShuttleResult<Uuid> {
        if template.language.is_empty() {
            return Err(ShuttleError::Validation(format!(
                "template '{}' has no language",
                template.name
            )));
        }
        let _slot = self.slot_guard.lock();
        if template.is_default {
            if let Some(existing) = self.conflicting_default(&template) {
                return Err(ShuttleError::Validation(format!(
                    "A default template already exists for this type/channel/language combination: {existing}"
                )));
            }
        }
        let id = template.id;
        debug!(id = %id, name = %template.name, kind = %template.notification_type, "template stored");
        self.templates.insert(id, template);
        Ok(id)
    }

    fn conflicting_default(&self, template: &MessageTemplate) -> Option<String> {
        self.templates
            .iter()
            .find(|r| r.key() != &template.id && r.value().is_default && r.value().shares_slot_with(template))
            .map(|r| r.value().name.clone())
    }

    /// Make `id` the default for its slot, demoting any other default.
    pub fn set_default(&self, id: Uuid) -> ShuttleResult<()> {
        let target = self
            .get(id)
            .ok_or_else(|| ShuttleError::Validation(format!("template {id} not found")))?;
        let _slot = self.slot_guard.lock();
        for mut entry in self.templates.iter_mut() {
            if entry.key() != &id && entry.value().is_default && entry.value().shares_slot_with(&target) {
                entry.value_mut().is_default = false;
            }
        }
        if let Some(mut entry) = self.templates.get_mut(&id) {
            entry.is_default = true;
        }
        Ok(())
    }

    pub fn deactivate(&self, id: Uuid) -> bool {
        match self.templates.get_mut(&id) {
            Some(mut entry) => {
                entry.is_active = false;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<MessageTemplate> {
        self.templates.get(&id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Best template for the request, walking `chain` in order.
    pub fn resolve(
        &self,
        notification_type: NotificationType,
        channel: NotificationChannel,
        chain: &LanguageChain,
    ) -> Option<MessageTemplate> {
        let mut candidates: Vec<MessageTemplate> = self
            .templates
            .iter()
            .filter(|r| {
                let t = r.value();
                t.is_active && t.notification_type == notification_type && t.serves(channel)
            })
            .map(|r| r.value().clone())
            .collect();
        // Defaults first, then channel-specific over catch-all, then sequence.
        candidates.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.channel.is_some().cmp(&a.channel.is_some()))
                .then(a.sequence.cmp(&b.sequence))
                .then(a.name.cmp(&b.name))
        });

        for language in chain.languages() {
            if let Some(found) = candidates.iter().find(|t| &t.language == language) {
                debug!(
                    template = %found.name,
                    language = %language,
                    channel = %channel,
                    "template resolved"
                );
                return Some(found.clone());
            }
        }
        None
    }

    /// Resolve and render in one step.
    pub fn render(
        &self,
        notification_type: NotificationType,
        channel: NotificationChannel,
        chain: &LanguageChain,
        values: &HashMap<String, String>,
    ) -> Option<String> {
        self.resolve(notification_type, channel, chain)
            .map(|t| t.render(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_render_with_defaults() {
        let template = MessageTemplate::new(
            "Approaching",
            NotificationType::Approaching,
            "en",
            "Hi {passenger_name}, {driver_name} arrives in {eta} min{company_name}",
        );
        let rendered = template.render(&values(&[("passenger_name", "Sara"), ("driver_name", "Omar")]));
        assert_eq!(rendered, "Hi Sara, Omar arrives in 10 min");
    }

    #[test]
    fn test_render_unknown_placeholder_keeps_body() {
        let template = MessageTemplate::new("Broken", NotificationType::Custom, "en", "Gate {gate_number}");
        assert_eq!(template.render(&HashMap::new()), "Gate {gate_number}");
        let rendered = template.render(&values(&[("gate_number", "4")]));
        assert_eq!(rendered, "Gate 4");
    }

    #[test]
    fn test_render_escaped_braces() {
        let template = MessageTemplate::new("Braces", NotificationType::Custom, "en", "{{literal}} {eta}");
        assert_eq!(template.render(&HashMap::new()), "{literal} 10");
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language("السائق وصل"), Some("ar"));
        assert_eq!(detect_language("Le bus est arrivé"), Some("fr"));
        assert_eq!(detect_language("Bus arrived"), Some("en"));
        assert_eq!(detect_language("12:30"), None);
    }

    #[test]
    fn test_language_chain_order_and_dedup() {
        let settings = TemplateSettings {
            default_language: "ar".into(),
            company_language: Some("fr_MA".into()),
        };
        let catalog = TemplateCatalog::from_settings(&settings);

        let chain = catalog.language_chain(Some("en-US"), detect_language("Bus arrived"));
        assert_eq!(chain.languages(), ["en", "fr", "ar"]);

        let chain = catalog.language_chain(Some(""), None);
        assert_eq!(chain.languages(), ["fr", "ar"]);
    }

    #[test]
    fn test_resolve_walks_chain_and_prefers_default() {
        let catalog = TemplateCatalog::new("ar");
        catalog
            .insert(MessageTemplate::new("ar plain", NotificationType::Arrived, "ar", "وصل السائق"))
            .unwrap();
        catalog
            .insert(MessageTemplate::new("fr any", NotificationType::Arrived, "fr", "Arrivé").for_channel(NotificationChannel::Sms))
            .unwrap();
        catalog
            .insert(MessageTemplate::new("fr default", NotificationType::Arrived, "fr", "Le chauffeur est arrivé").as_default())
            .unwrap();

        let chain = LanguageChain::new().then(Some("en")).then(Some("fr")).then(Some("ar"));
        let found = catalog.resolve(NotificationType::Arrived, NotificationChannel::Sms, &chain).unwrap();
        assert_eq!(found.name, "fr default");

        let chain = LanguageChain::new().then(Some("en")).then(Some("ar"));
        let found = catalog.resolve(NotificationType::Arrived, NotificationChannel::Push, &chain).unwrap();
        assert_eq!(found.name, "ar plain");

        assert!(catalog
            .resolve(NotificationType::Reminder, NotificationChannel::Sms, &chain)
            .is_none());
    }

    #[test]
    fn test_inactive_templates_skipped() {
        let catalog = TemplateCatalog::new("ar");
        let id = catalog
            .insert(MessageTemplate::new("only", NotificationType::Reminder, "ar", "تذكير"))
            .unwrap();
        assert!(catalog.deactivate(id));
        let chain = catalog.language_chain(None, None);
        assert!(catalog.resolve(NotificationType::Reminder, NotificationChannel::Email, &chain).is_none());
    }

    #[test]
    fn test_single_default_per_slot() {
        let catalog = TemplateCatalog::new("ar");
        catalog
            .insert(MessageTemplate::new("first", NotificationType::Cancelled, "en", "Cancelled").as_default())
            .unwrap();
        let err = catalog
            .insert(
                MessageTemplate::new("second", NotificationType::Cancelled, "en", "Trip cancelled")
                    .for_channel(NotificationChannel::Sms)
                    .as_default(),
            )
            .unwrap_err();
        assert!(matches!(err, ShuttleError::Validation(_)));

        // Another language is a separate slot.
        catalog
            .insert(MessageTemplate::new("third", NotificationType::Cancelled, "ar", "ألغيت الرحلة").as_default())
            .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_concurrent_default_inserts_keep_one() {
        let catalog = TemplateCatalog::new("ar");
        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let catalog = &catalog;
                    scope.spawn(move || {
                        let channel = if i % 2 == 0 { Some(NotificationChannel::Sms) } else { None };
                        let mut template =
                            MessageTemplate::new(format!("reminder-{i}"), NotificationType::Reminder, "fr", "Rappel")
                                .as_default();
                        template.channel = channel;
                        catalog.insert(template).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(accepted, 1);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_set_default_demotes_previous() {
        let catalog = TemplateCatalog::new("ar");
        let first = catalog
            .insert(MessageTemplate::new("first", NotificationType::TripStarted, "en", "Started").as_default())
            .unwrap();
        let second = catalog
            .insert(MessageTemplate::new("second", NotificationType::TripStarted, "en", "Trip started"))
            .unwrap();

        catalog.set_default(second).unwrap();
        assert!(!catalog.get(first).unwrap().is_default);
        assert!(catalog.get(second).unwrap().is_default);

        let chain = catalog.language_chain(Some("en"), None);
        let rendered = catalog
            .render(NotificationType::TripStarted, NotificationChannel::WhatsApp, &chain, &HashMap::new())
            .unwrap();
        assert_eq!(rendered, "Trip started");
    }
}
