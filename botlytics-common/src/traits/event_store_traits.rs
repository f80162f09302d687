use std::sync::Arc;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use crate::error::Error;
use crate::models::{Event, EventFilter, StoredEvent};

/// Lazy, finite sequence of stored events in ascending `received_at` order.
pub type EventStream = BoxStream<'static, Result<StoredEvent, Error>>;

/// Append-only event log.
///
/// Implementations own identifier and `received_at` sequencing: concurrent
/// `append` calls are linearized internally, and each event is written as a
/// single unit. `query` observes every append that completed before it was
/// called and never a partially written event. Each call returns a fresh,
/// independent stream.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    async fn append(&self, event: Event) -> Result<StoredEvent, Error>;

    async fn query(&self, filter: &EventFilter) -> Result<EventStream, Error>;

    /// Total number of stored events.
    async fn count(&self) -> Result<u64, Error>;

    /// Up to `limit` most recent events, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, Error>;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn append(&self, event: Event) -> Result<StoredEvent, Error> {
        (**self).append(event).await
    }

    async fn query(&self, filter: &EventFilter) -> Result<EventStream, Error> {
        (**self).query(filter).await
    }

    async fn count(&self) -> Result<u64, Error> {
        (**self).count().await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, Error> {
        (**self).recent(limit).await
    }
}
