// File: botlytics-common/src/models/event.rs

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::attribution::SOURCE;
use crate::models::property::{get_path, Properties, PropertyValue};

pub const USER_ID: &str = "user_id";
pub const SESSION_ID: &str = "session_id";
pub const TIMESTAMP: &str = "timestamp";
pub const PLATFORM: &str = "platform";

/// Event vocabulary emitted by the bot front end. The store accepts any
/// non-empty type; this enum only names the ones the bot produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownEventType {
    BotStarted,
    MainMenuOpened,
    DecodeInitiated,
    PhraseSubmitted,
    ApiRequestSent,
    DecodeCompleted,
    DecodeFailed,
    ButtonClicked,
    ExampleViewed,
    HowItWorksViewed,
    TipsViewed,
    SessionStarted,
    SessionEnded,
    MoreOptionsRequested,
    SimilarExamplesRequested,
    UserReturned,
}

impl KnownEventType {
    pub const ALL: [KnownEventType; 16] = [
        KnownEventType::BotStarted,
        KnownEventType::MainMenuOpened,
        KnownEventType::DecodeInitiated,
        KnownEventType::PhraseSubmitted,
        KnownEventType::ApiRequestSent,
        KnownEventType::DecodeCompleted,
        KnownEventType::DecodeFailed,
        KnownEventType::ButtonClicked,
        KnownEventType::ExampleViewed,
        KnownEventType::HowItWorksViewed,
        KnownEventType::TipsViewed,
        KnownEventType::SessionStarted,
        KnownEventType::SessionEnded,
        KnownEventType::MoreOptionsRequested,
        KnownEventType::SimilarExamplesRequested,
        KnownEventType::UserReturned,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            KnownEventType::BotStarted => "bot_started",
            KnownEventType::MainMenuOpened => "main_menu_opened",
            KnownEventType::DecodeInitiated => "decode_initiated",
            KnownEventType::PhraseSubmitted => "phrase_submitted",
            KnownEventType::ApiRequestSent => "api_request_sent",
            KnownEventType::DecodeCompleted => "decode_completed",
            KnownEventType::DecodeFailed => "decode_failed",
            KnownEventType::ButtonClicked => "button_clicked",
            KnownEventType::ExampleViewed => "example_viewed",
            KnownEventType::HowItWorksViewed => "how_it_works_viewed",
            KnownEventType::TipsViewed => "tips_viewed",
            KnownEventType::SessionStarted => "session_started",
            KnownEventType::SessionEnded => "session_ended",
            KnownEventType::MoreOptionsRequested => "more_options_requested",
            KnownEventType::SimilarExamplesRequested => "similar_examples_requested",
            KnownEventType::UserReturned => "user_returned",
        }
    }
}

impl KnownEventType {
    /// True when `event_type` names one of the bot's own events.
    pub fn is_known(event_type: &str) -> bool {
        event_type.parse::<KnownEventType>().is_ok()
    }
}

impl fmt::Display for KnownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownEventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        KnownEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("Unknown event type: {}", s))
    }
}

/// A normalized event, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub properties: Properties,
    /// Server-assigned; the client `timestamp` property is never used for ordering.
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn user_id(&self) -> &str {
        string_prop(&self.properties, USER_ID)
    }

    pub fn session_id(&self) -> &str {
        string_prop(&self.properties, SESSION_ID)
    }

    pub fn source(&self) -> Option<&str> {
        self.properties.get(SOURCE).and_then(PropertyValue::as_str)
    }

    pub fn property<S: AsRef<str>>(&self, path: &[S]) -> Option<&PropertyValue> {
        get_path(&self.properties, path)
    }
}

/// An event as persisted by an `EventStore`.
///
/// `id` and `received_at` are both strictly increasing in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub event_type: String,
    pub properties: Properties,
    pub received_at: DateTime<Utc>,
}

impl StoredEvent {
    pub fn from_event(id: i64, event: Event) -> Self {
        Self {
            id,
            event_type: event.event_type,
            properties: event.properties,
            received_at: event.received_at,
        }
    }

    pub fn user_id(&self) -> &str {
        string_prop(&self.properties, USER_ID)
    }

    pub fn session_id(&self) -> &str {
        string_prop(&self.properties, SESSION_ID)
    }

    pub fn source(&self) -> Option<&str> {
        self.properties.get(SOURCE).and_then(PropertyValue::as_str)
    }

    pub fn property<S: AsRef<str>>(&self, path: &[S]) -> Option<&PropertyValue> {
        get_path(&self.properties, path)
    }
}

fn string_prop<'a>(props: &'a Properties, key: &str) -> &'a str {
    props.get(key).and_then(PropertyValue::as_str).unwrap_or_default()
}

/// Producer input, before normalization.
///
/// Also accepts the bot's JSON log line shape, where the type is under `event`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawEvent {
    #[serde(alias = "event")]
    pub event_type: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub start_payload: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_event_type_round_trips_through_str() {
        for t in KnownEventType::ALL {
            assert_eq!(t.as_str().parse::<KnownEventType>().unwrap(), t);
        }
        assert!("not_a_type".parse::<KnownEventType>().is_err());
        assert!(KnownEventType::is_known("Decode_Completed"));
        assert!(!KnownEventType::is_known("checkout_opened"));
        assert_eq!(
            serde_json::to_string(&KnownEventType::HowItWorksViewed).unwrap(),
            "\"how_it_works_viewed\""
        );
    }

    #[test]
    fn test_raw_event_accepts_log_line_shape() {
        let line = r#"{"event":"decode_completed","properties":{"user_id":"42","session_id":"s1","response_time_ms":1200}}"#;
        let raw: RawEvent = serde_json::from_str(line).unwrap();
        assert_eq!(raw.event_type, "decode_completed");
        assert_eq!(raw.properties["response_time_ms"], PropertyValue::Int(1200));
        assert!(raw.start_payload.is_none());
    }

    #[test]
    fn test_accessors_default_to_empty() {
        let evt = StoredEvent {
            id: 1,
            event_type: "tips_viewed".into(),
            properties: Properties::new(),
            received_at: Utc::now(),
        };
        assert_eq!(evt.user_id(), "");
        assert_eq!(evt.session_id(), "");
        assert!(evt.source().is_none());
    }
}
