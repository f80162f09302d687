// File: botlytics-common/src/models/aggregate.rs

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::models::filter::TimeRange;

/// A computed metric together with the window it was computed over.
/// Built on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult<T> {
    pub metric: String,
    pub range: TimeRange,
    pub value: T,
}

impl<T> AggregateResult<T> {
    pub fn new(metric: impl Into<String>, range: TimeRange, value: T) -> Self {
        Self { metric: metric.into(), range, value }
    }
}

/// Per-session rollup over the events that carry one `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRollup {
    pub session_id: String,
    pub user_id: String,
    pub source: Option<String>,
    pub event_count: u64,
    pub counts_by_type: BTreeMap<String, u64>,
    pub first_received_at: DateTime<Utc>,
    pub last_received_at: DateTime<Utc>,
    pub duration_ms: i64,
}
