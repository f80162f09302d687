// File: botlytics-core/src/normalizer.rs

use std::collections::HashSet;
use tracing::debug;

use botlytics_common::models::attribution::SOURCE;
use botlytics_common::models::event::{PLATFORM, SESSION_ID, TIMESTAMP, USER_ID};
use botlytics_common::models::{Event, Properties, PropertyValue, RawEvent};
use crate::attribution::attribution_from_payload;
use crate::config::AnalyticsConfig;
use crate::utils::time::MonotonicClock;
use crate::Error;

/// Turns raw producer input into canonical `Event`s.
///
/// Pure apart from reading its own clock; persistence is left to the store.
#[derive(Debug)]
pub struct EventNormalizer {
    clock: MonotonicClock,
    session_start_types: HashSet<String>,
    default_platform: Option<String>,
    default_source: Option<String>,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::from_config(&AnalyticsConfig::default())
    }
}

impl EventNormalizer {
    pub fn from_config(cfg: &AnalyticsConfig) -> Self {
        Self {
            clock: MonotonicClock::new(),
            session_start_types: cfg.session_start_types.iter().cloned().collect(),
            default_platform: cfg.default_platform.clone(),
            default_source: cfg.default_source.clone(),
        }
    }

    pub fn is_session_start(&self, event_type: &str) -> bool {
        self.session_start_types.contains(event_type)
    }

    pub fn normalize_raw(&self, raw: RawEvent) -> Result<Event, Error> {
        self.normalize(&raw.event_type, raw.properties, raw.start_payload.as_deref())
    }

    pub fn normalize(
        &self,
        raw_type: &str,
        mut properties: Properties,
        start_payload: Option<&str>,
    ) -> Result<Event, Error> {
        let event_type = raw_type.trim();
        if event_type.is_empty() {
            return Err(Error::Validation("event_type must not be empty".into()));
        }

        require_identity(&mut properties, USER_ID)?;
        require_identity(&mut properties, SESSION_ID)?;

        let received_at = self.clock.now();

        if !properties.contains_key(TIMESTAMP) {
            properties.insert(TIMESTAMP.into(), PropertyValue::from(received_at.to_rfc3339()));
        }

        if let Some(platform) = &self.default_platform {
            properties
                .entry(PLATFORM.to_string())
                .or_insert_with(|| PropertyValue::from(platform.clone()));
        }

        if self.is_session_start(event_type) {
            match attribution_from_payload(start_payload) {
                Some(attr) => {
                    debug!(
                        "Attributed {} for user {} to source={} campaign={}",
                        event_type,
                        properties[USER_ID],
                        attr.source,
                        attr.campaign
                    );
                    attr.merge_into(&mut properties);
                }
                None => {
                    if let Some(source) = &self.default_source {
                        properties
                            .entry(SOURCE.to_string())
                            .or_insert_with(|| PropertyValue::from(source.clone()));
                    }
                }
            }
        }

        Ok(Event {
            event_type: event_type.to_string(),
            properties,
            received_at,
        })
    }
}

/// Checks that `key` holds a non-empty identity. Integer ids (the bot's chat
/// ids) are rewritten as strings so every identity is indexed the same way.
fn require_identity(props: &mut Properties, key: &str) -> Result<(), Error> {
    let normalized = match props.get(key) {
        Some(PropertyValue::String(s)) if !s.trim().is_empty() => return Ok(()),
        Some(PropertyValue::Int(i)) => i.to_string(),
        Some(PropertyValue::String(_)) => {
            return Err(Error::Validation(format!("properties.{} must not be empty", key)))
        }
        Some(other) => {
            return Err(Error::Validation(format!(
                "properties.{} must be a string or integer, got {}",
                key, other
            )))
        }
        None => return Err(Error::Validation(format!("properties.{} is required", key))),
    };
    props.insert(key.to_string(), PropertyValue::String(normalized));
    Ok(())
}
