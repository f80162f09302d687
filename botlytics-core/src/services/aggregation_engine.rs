//! botlytics-core/src/services/aggregation_engine.rs
//!
//! Read-side metrics computed by streaming `EventStore::query` results.
//! Nothing here mutates the store, so every metric is a pure function of the
//! stored events and the requested window.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use futures_util::TryStreamExt;
use tracing::{debug, warn};

use botlytics_common::models::property::split_path;
use botlytics_common::models::{AggregateResult, EventFilter, SessionRollup, StoredEvent, TimeRange};
use botlytics_common::traits::EventStore;
use crate::Error;

pub struct AggregationEngine<S> {
    store: S,
    timeout: Option<Duration>,
}

impl<S: EventStore> AggregationEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store, timeout: None }
    }

    /// Every aggregation fails with `Error::Timeout` once it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn bounded<T, F>(&self, metric: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(elapsed) => {
                    warn!("Aggregation '{}' exceeded its {:?} deadline", metric, limit);
                    Err(Error::Timeout(elapsed))
                }
            },
            None => fut.await,
        }
    }

    /// Feeds every event matching `filter` to `visit`, in `received_at` order.
    async fn scan<F>(&self, filter: &EventFilter, mut visit: F) -> Result<(), Error>
    where
        F: FnMut(StoredEvent),
    {
        let mut stream = self.store.query(filter).await?;
        while let Some(evt) = stream.try_next().await? {
            visit(evt);
        }
        Ok(())
    }

    /// Number of events per event type.
    pub async fn count_by_type(&self, range: &TimeRange) -> Result<AggregateResult<BTreeMap<String, u64>>, Error> {
        let filter = EventFilter::new().range(*range);
        let counts = self
            .bounded("count_by_type", async {
                let mut counts = BTreeMap::new();
                self.scan(&filter, |evt| {
                    *counts.entry(evt.event_type).or_insert(0u64) += 1;
                })
                .await?;
                Ok(counts)
            })
            .await?;
        Ok(AggregateResult::new("count_by_type", *range, counts))
    }

    /// Distinct `user_id`s per `source` among events of `event_type`.
    /// Events without a string `source` are not counted.
    pub async fn count_distinct_subjects_by_source(
        &self,
        event_type: &str,
        range: &TimeRange,
    ) -> Result<AggregateResult<BTreeMap<String, u64>>, Error> {
        let filter = EventFilter::new().event_type(event_type).range(*range);
        let counts = self
            .bounded("distinct_subjects_by_source", async {
                let mut subjects: BTreeMap<String, HashSet<String>> = BTreeMap::new();
                self.scan(&filter, |evt| {
                    if let Some(source) = evt.source() {
                        subjects
                            .entry(source.to_string())
                            .or_default()
                            .insert(evt.user_id().to_string());
                    }
                })
                .await?;
                Ok(subjects
                    .into_iter()
                    .map(|(source, users)| (source, users.len() as u64))
                    .collect::<BTreeMap<String, u64>>())
            })
            .await?;
        Ok(AggregateResult::new(
            format!("distinct_subjects_by_source:{}", event_type),
            *range,
            counts,
        ))
    }

    /// Funnel conversion per source:
    /// `distinct users reaching end_type / distinct users with start_type`.
    ///
    /// A user's source is the first one carried by their `start_type` events in
    /// the window; completers who never started in the window are ignored.
    /// Sources without starters are absent from the result.
    pub async fn conversion_rate(
        &self,
        start_type: &str,
        end_type: &str,
        range: &TimeRange,
    ) -> Result<AggregateResult<BTreeMap<String, f64>>, Error> {
        let start_filter = EventFilter::new().event_type(start_type).range(*range);
        let end_filter = EventFilter::new().event_type(end_type).range(*range);

        let rates = self
            .bounded("conversion_rate", async {
                let mut first_source: HashMap<String, String> = HashMap::new();
                self.scan(&start_filter, |evt| {
                    if let Some(source) = evt.source() {
                        first_source
                            .entry(evt.user_id().to_string())
                            .or_insert_with(|| source.to_string());
                    }
                })
                .await?;

                let mut completers: HashSet<String> = HashSet::new();
                self.scan(&end_filter, |evt| {
                    if first_source.contains_key(evt.user_id()) {
                        completers.insert(evt.user_id().to_string());
                    }
                })
                .await?;

                let mut totals: BTreeMap<String, (u64, u64)> = BTreeMap::new();
                for (user, source) in &first_source {
                    let entry = totals.entry(source.clone()).or_insert((0, 0));
                    entry.0 += 1;
                    if completers.contains(user) {
                        entry.1 += 1;
                    }
                }

                Ok(totals
                    .into_iter()
                    .filter(|(_, (starters, _))| *starters > 0)
                    .map(|(source, (starters, converted))| (source, converted as f64 / starters as f64))
                    .collect::<BTreeMap<String, f64>>())
            })
            .await?;

        debug!("conversion {} -> {} over {}: {:?}", start_type, end_type, range, rates);
        Ok(AggregateResult::new(
            format!("conversion_rate:{}->{}", start_type, end_type),
            *range,
            rates,
        ))
    }

    /// Mean of a numeric property (dotted path) over events of `event_type`.
    /// Missing or non-numeric values are skipped; `None` means no data.
    pub async fn average_numeric_property(
        &self,
        event_type: &str,
        property_path: &str,
        range: &TimeRange,
    ) -> Result<AggregateResult<Option<f64>>, Error> {
        let filter = EventFilter::new().event_type(event_type).range(*range);
        let path = split_path(property_path);

        let mean = self
            .bounded("average_numeric_property", async {
                let (mut sum, mut n) = (0.0f64, 0u64);
                self.scan(&filter, |evt| {
                    if let Some(v) = evt.property(path.as_slice()).and_then(|p| p.as_f64()) {
                        sum += v;
                        n += 1;
                    }
                })
                .await?;
                Ok(if n == 0 { None } else { Some(sum / n as f64) })
            })
            .await?;

        Ok(AggregateResult::new(
            format!("average:{}.{}", event_type, property_path),
            *range,
            mean,
        ))
    }

    /// One rollup per `session_id` seen in the window, ordered by first event.
    pub async fn session_rollups(&self, range: &TimeRange) -> Result<AggregateResult<Vec<SessionRollup>>, Error> {
        let filter = EventFilter::new().range(*range);

        let rollups = self
            .bounded("session_rollups", async {
                let mut sessions: HashMap<String, SessionRollup> = HashMap::new();
                self.scan(&filter, |evt| {
                    let rollup = sessions
                        .entry(evt.session_id().to_string())
                        .or_insert_with(|| SessionRollup {
                            session_id: evt.session_id().to_string(),
                            user_id: evt.user_id().to_string(),
                            source: None,
                            event_count: 0,
                            counts_by_type: BTreeMap::new(),
                            first_received_at: evt.received_at,
                            last_received_at: evt.received_at,
                            duration_ms: 0,
                        });
                    if rollup.source.is_none() {
                        rollup.source = evt.source().map(str::to_string);
                    }
                    rollup.event_count += 1;
                    *rollup.counts_by_type.entry(evt.event_type.clone()).or_insert(0) += 1;
                    rollup.last_received_at = evt.received_at;
                    rollup.duration_ms =
                        (rollup.last_received_at - rollup.first_received_at).num_milliseconds();
                })
                .await?;

                let mut out: Vec<SessionRollup> = sessions.into_values().collect();
                out.sort_by_key(|r| r.first_received_at);
                Ok(out)
            })
            .await?;

        Ok(AggregateResult::new("session_rollups", *range, rollups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use async_trait::async_trait;
    use futures_util::stream::{BoxStream, Stream, StreamExt};
    use botlytics_common::models::Event;
    use botlytics_common::traits::EventStream;

    /// Store whose query stream never yields; exercises the deadline.
    struct StalledStore;

    struct Pending;

    impl Stream for Pending {
        type Item = Result<StoredEvent, Error>;
        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    #[async_trait]
    impl EventStore for StalledStore {
        async fn append(&self, _event: Event) -> Result<StoredEvent, Error> {
            Err(Error::Storage("read-only".into()))
        }

        async fn query(&self, _filter: &EventFilter) -> Result<EventStream, Error> {
            let stream: BoxStream<'static, Result<StoredEvent, Error>> = Pending.boxed();
            Ok(stream)
        }

        async fn count(&self) -> Result<u64, Error> {
            Ok(0)
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<StoredEvent>, Error> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_deadline_surfaces_timeout() {
        let engine = AggregationEngine::new(StalledStore).with_timeout(Duration::from_millis(20));
        let err = engine.count_by_type(&TimeRange::all()).await.unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        struct BrokenStore;

        #[async_trait]
        impl EventStore for BrokenStore {
            async fn append(&self, _event: Event) -> Result<StoredEvent, Error> {
                Err(Error::Storage("down".into()))
            }
            async fn query(&self, _filter: &EventFilter) -> Result<EventStream, Error> {
                Err(Error::Storage("down".into()))
            }
            async fn count(&self) -> Result<u64, Error> {
                Err(Error::Storage("down".into()))
            }
            async fn recent(&self, _limit: usize) -> Result<Vec<StoredEvent>, Error> {
                Err(Error::Storage("down".into()))
            }
        }

        let engine = AggregationEngine::new(BrokenStore);
        let err = engine
            .conversion_rate("bot_started", "decode_completed", &TimeRange::all())
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }
}
