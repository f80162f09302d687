// File: botlytics-core/src/repositories/memory/events.rs
//
// In-process event log. Same contract as the Postgres store, minus durability.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::SubsecRound;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use tracing::{debug, trace};

use botlytics_common::models::{Event, EventFilter, StoredEvent};
use botlytics_common::traits::{EventStore, EventStream};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::utils::time::next_after;
use crate::Error;

#[derive(Default)]
struct EventLog {
    /// Position `i` holds the event with id `i + 1`; ids and `received_at`
    /// both increase with position.
    events: Vec<Arc<StoredEvent>>,
    by_type: HashMap<String, Vec<usize>>,
    by_user: HashMap<String, Vec<usize>>,
}

impl EventLog {
    /// Candidate positions for `filter`, taken from the narrowest index available.
    fn candidates(&self, filter: &EventFilter) -> Option<&[usize]> {
        if let Some(user) = &filter.user_id {
            return Some(self.by_user.get(user).map(Vec::as_slice).unwrap_or(&[]));
        }
        if let Some(event_type) = &filter.event_type {
            return Some(self.by_type.get(event_type).map(Vec::as_slice).unwrap_or(&[]));
        }
        None
    }

    /// First position whose `received_at` is within the range start.
    fn lower_bound(&self, filter: &EventFilter) -> usize {
        match filter.range.start {
            Some(start) => self.events.partition_point(|e| e.received_at < start),
            None => 0,
        }
    }

    /// Collects up to `limit` matches with position in `[from, upper)`, plus
    /// the position to resume from when the page filled up.
    fn page(&self, filter: &EventFilter, from: usize, upper: usize, limit: usize) -> (Vec<StoredEvent>, Option<usize>) {
        let from = from.max(self.lower_bound(filter));
        let positions: Box<dyn Iterator<Item = usize> + '_> = match self.candidates(filter) {
            Some(indexed) => {
                let idx = indexed.partition_point(|p| *p < from);
                Box::new(indexed[idx..].iter().copied())
            }
            None => Box::new(from..upper),
        };

        let mut out = Vec::new();
        for pos in positions {
            if pos >= upper {
                break;
            }
            let evt = &self.events[pos];
            if filter.range.end.is_some_and(|end| evt.received_at >= end) {
                break;
            }
            if filter.matches(evt) {
                out.push(evt.as_ref().clone());
                if out.len() >= limit {
                    return (out, Some(pos + 1));
                }
            }
        }
        (out, None)
    }
}

/// Append-only in-memory store. Cloning shares the underlying log.
#[derive(Clone)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<EventLog>>,
    page_size: usize,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            log: Arc::new(RwLock::new(EventLog::default())),
            page_size: page_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.log.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: Event) -> Result<StoredEvent, Error> {
        let mut log = self.log.write();

        let pos = log.events.len();
        let prev = log.events.last().map(|e| e.received_at);
        let mut stored = StoredEvent::from_event(pos as i64 + 1, event);
        stored.received_at = next_after(prev, stored.received_at.trunc_subsecs(6));

        log.by_type.entry(stored.event_type.clone()).or_default().push(pos);
        log.by_user.entry(stored.user_id().to_string()).or_default().push(pos);
        log.events.push(Arc::new(stored.clone()));

        trace!("memory store appended id={} type={}", stored.id, stored.event_type);
        Ok(stored)
    }

    async fn query(&self, filter: &EventFilter) -> Result<EventStream, Error> {
        let upper = self.log.read().events.len();
        debug!("memory store query {:?} over {} events", filter, upper);

        if filter.range.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let log = Arc::clone(&self.log);
        let filter = filter.clone();
        let page_size = self.page_size;

        let pages = stream::try_unfold(Some(0usize), move |cursor| {
            let log = Arc::clone(&log);
            let filter = filter.clone();
            async move {
                let Some(from) = cursor else {
                    return Ok::<_, Error>(None);
                };
                let (events, next) = log.read().page(&filter, from, upper, page_size);
                if events.is_empty() {
                    return Ok(None);
                }
                Ok(Some((stream::iter(events.into_iter().map(Ok::<StoredEvent, Error>)), next)))
            }
        });

        Ok(pages.try_flatten().boxed())
    }

    async fn count(&self) -> Result<u64, Error> {
        Ok(self.log.read().events.len() as u64)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, Error> {
        let log = self.log.read();
        Ok(log
            .events
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.as_ref().clone())
            .collect())
    }
}
