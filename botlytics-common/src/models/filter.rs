// File: botlytics-common/src/models/filter.rs

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::Error;
use crate::models::event::StoredEvent;
use crate::models::property::{get_path, split_path, Properties, PropertyValue};

/// Half-open window `[start, end)` over `received_at`. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start: Some(start), end: Some(end) }
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self { start: Some(start), end: None }
    }

    pub fn until(end: DateTime<Utc>) -> Self {
        Self { start: None, end: Some(end) }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts < e)
    }

    /// True when the window cannot contain anything.
    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s >= e)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_bound = |b: Option<DateTime<Utc>>| {
            b.map(|t| t.to_rfc3339()).unwrap_or_else(|| "*".to_string())
        };
        write!(f, "[{}, {})", fmt_bound(self.start), fmt_bound(self.end))
    }
}

/// Matches events whose property at `path` contains `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyPredicate {
    pub path: Vec<String>,
    pub value: PropertyValue,
}

impl PropertyPredicate {
    pub fn new<S: Into<String>>(path: impl IntoIterator<Item = S>, value: impl Into<PropertyValue>) -> Self {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            value: value.into(),
        }
    }

    /// Parses `meta.utm_source=google` style expressions.
    pub fn parse(expr: &str) -> Result<Self, Error> {
        let (path, value) = expr
            .split_once('=')
            .ok_or_else(|| Error::Parse(format!("expected PATH=VALUE, got '{}'", expr)))?;
        let path = split_path(path.trim());
        if path.is_empty() {
            return Err(Error::Parse(format!("empty property path in '{}'", expr)));
        }
        Ok(Self { path, value: PropertyValue::parse_literal(value.trim()) })
    }

    pub fn matches(&self, props: &Properties) -> bool {
        get_path(props, self.path.as_slice()).is_some_and(|v| v.contains(&self.value))
    }

    /// The predicate as a nested document, suitable for JSON containment (`@>`).
    pub fn to_containment(&self) -> Properties {
        let mut value = self.value.clone();
        for key in self.path.iter().skip(1).rev() {
            let mut wrapper = Properties::new();
            wrapper.insert(key.clone(), value);
            value = PropertyValue::Map(wrapper);
        }
        let mut doc = Properties::new();
        if let Some(first) = self.path.first() {
            doc.insert(first.clone(), value);
        }
        doc
    }
}

/// Selection criteria for `EventStore::query`. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub range: TimeRange,
    pub property: Option<PropertyPredicate>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn property(mut self, predicate: PropertyPredicate) -> Self {
        self.property = Some(predicate);
        self
    }

    pub fn matches(&self, event: &StoredEvent) -> bool {
        self.event_type.as_deref().is_none_or(|t| event.event_type == t)
            && self.user_id.as_deref().is_none_or(|u| event.user_id() == u)
            && self.range.contains(event.received_at)
            && self.property.as_ref().is_none_or(|p| p.matches(&event.properties))
    }
}
