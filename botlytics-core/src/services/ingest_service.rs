use tracing::{debug, error, warn};

use botlytics_common::models::{EventFilter, KnownEventType, Properties, RawEvent, StoredEvent};
use botlytics_common::traits::{EventStore, EventStream};
use crate::normalizer::EventNormalizer;
use crate::Error;

/// The single ingestion entry point: normalize, then append.
pub struct IngestService<S> {
    normalizer: EventNormalizer,
    store: S,
}

impl<S: EventStore> IngestService<S> {
    pub fn new(normalizer: EventNormalizer, store: S) -> Self {
        Self { normalizer, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates, attributes and persists one event.
    ///
    /// Validation failures are returned without touching the store. Storage
    /// failures are returned as-is; retrying is up to the caller.
    pub async fn submit_event(
        &self,
        event_type: &str,
        properties: Properties,
        start_payload: Option<&str>,
    ) -> Result<StoredEvent, Error> {
        let event = match self.normalizer.normalize(event_type, properties, start_payload) {
            Ok(evt) => evt,
            Err(e) => {
                warn!("Rejected '{}' event: {}", event_type, e);
                return Err(e);
            }
        };

        if !KnownEventType::is_known(&event.event_type) {
            debug!("Storing event of unlisted type '{}'", event.event_type);
        }

        match self.store.append(event).await {
            Ok(stored) => {
                debug!(
                    "Event: {} | id={} | User: {}",
                    stored.event_type,
                    stored.id,
                    stored.user_id()
                );
                Ok(stored)
            }
            Err(e) => {
                error!("Failed to store '{}' event: {}", event_type, e);
                Err(e)
            }
        }
    }

    pub async fn submit_raw(&self, raw: RawEvent) -> Result<StoredEvent, Error> {
        self.submit_event(&raw.event_type, raw.properties, raw.start_payload.as_deref())
            .await
    }

    pub async fn query_events(&self, filter: &EventFilter) -> Result<EventStream, Error> {
        self.store.query(filter).await
    }
}
