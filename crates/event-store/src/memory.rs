use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, GlobalPosition, Result, Snapshot, Version,
    store::{AppendOptions, EventStore, EventStream, check_continuation, validate_batch},
};

#[derive(Default)]
struct Log {
    /// Global log; the event at index `i` has position `i + 1`.
    events: Vec<EventEnvelope>,
    /// Per-stream indexes into `events`, in version order.
    streams: HashMap<AggregateId, Vec<usize>>,
    snapshots: HashMap<AggregateId, Snapshot>,
}

impl Log {
    fn stream_version(&self, aggregate_id: AggregateId) -> Version {
        self.streams
            .get(&aggregate_id)
            .and_then(|indexes| indexes.last())
            .map(|&i| self.events[i].version)
            .unwrap_or_default()
    }

    fn stream_events(&self, aggregate_id: AggregateId) -> impl Iterator<Item = &EventEnvelope> {
        self.streams
            .get(&aggregate_id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.events[i])
    }
}

/// Event store kept entirely in process memory.
///
/// The version check and the write happen under one write lock, so
/// concurrent appends to the same stream are serialized exactly as a
/// database unique constraint would serialize them.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_batch(&events)?;
        let aggregate_id = events[0].aggregate_id;

        let mut log = self.log.write().await;
        let current = log.stream_version(aggregate_id);
        if let Err(conflict) = check_continuation(&events, options, current) {
            metrics::counter!("event_store_conflicts_total").increment(1);
            return Err(conflict);
        }

        let mut last_version = current;
        for mut event in events {
            let index = log.events.len();
            event.position = GlobalPosition::new(index as i64 + 1);
            last_version = event.version;
            log.events.push(event);
            log.streams.entry(aggregate_id).or_default().push(index);
        }

        tracing::trace!(%aggregate_id, version = %last_version, "appended to in-memory stream");
        Ok(last_version)
    }

    async fn read_stream(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log.stream_events(aggregate_id).cloned().collect())
    }

    async fn read_stream_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .stream_events(aggregate_id)
            .filter(|e| e.version >= from_version)
            .cloned()
            .collect())
    }

    async fn read_all_from(
        &self,
        after: GlobalPosition,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let start = usize::try_from(after.as_i64()).unwrap_or(0);
        Ok(log.events.iter().skip(start).take(limit).cloned().collect())
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let matching = log.events.iter().filter(|e| query.matches(e)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        let events = self.log.read().await.events.clone();
        Ok(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        )))
    }

    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        Ok(log
            .streams
            .contains_key(&aggregate_id)
            .then(|| log.stream_version(aggregate_id)))
    }

    async fn list_streams(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let log = self.log.read().await;
        let mut ids: Vec<_> = log
            .streams
            .iter()
            .filter(|(_, indexes)| {
                indexes
                    .first()
                    .is_some_and(|&i| log.events[i].aggregate_type == aggregate_type)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut log = self.log.write().await;
        log.snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self.log.read().await.snapshots.get(&aggregate_id).cloned())
    }
}
