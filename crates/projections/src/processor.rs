//! Projection processor for feeding events to projections.

use std::sync::Arc;

use event_store::{EventEnvelope, EventStore, GlobalPosition};
use futures_util::StreamExt;

use crate::{ProjectionError, Result};
use crate::projection::Projection;

/// Events fetched per round trip during catch-up.
const CATCH_UP_BATCH: usize = 256;

/// Processes events from an event store and delivers them to projections.
///
/// The processor supports:
/// - Catch-up: reads the log after the furthest-behind projection and hands
///   each projection the events it has not seen
/// - Single event delivery
/// - Rebuild: resets all projections and replays the whole log
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Arc<dyn Projection>>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
        }
    }

    /// Registers a projection. The caller may keep a clone of the `Arc` to
    /// query the read model.
    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Brings every projection up to the head of the log.
    ///
    /// Returns the number of events read from the store.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let mut after = self.slowest_position().await;
        let mut events_read: u64 = 0;

        loop {
            let batch = self.store.read_all_from(after, CATCH_UP_BATCH).await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.position;

            for event in &batch {
                self.deliver(event).await?;
            }
            events_read += batch.len() as u64;

            if batch.len() < CATCH_UP_BATCH {
                break;
            }
        }

        if events_read > 0 {
            tracing::debug!(events_read, "catch-up complete");
        }
        Ok(events_read)
    }

    /// Delivers a single event to every projection that has not seen it.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        self.deliver(event).await
    }

    /// Resets all projections and replays all events from the store.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            projection.reset().await?;
        }

        let mut stream = self.store.stream_all_events().await?;
        let mut replayed: u64 = 0;
        while let Some(result) = stream.next().await {
            self.deliver(&result?).await?;
            replayed += 1;
        }

        tracing::info!(replayed, "projections rebuilt");
        Ok(())
    }

    async fn deliver(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            if projection.position().await.is_behind(event.position) {
                projection
                    .handle(event)
                    .await
                    .map_err(|e| ProjectionError::Halted {
                        projection: projection.name(),
                        position: event.position,
                        source: Box::new(e),
                    })?;
                metrics::counter!("projections_events_processed_total", "projection" => projection.name())
                    .increment(1);
            }
        }
        Ok(())
    }

    async fn slowest_position(&self) -> GlobalPosition {
        let mut slowest: Option<GlobalPosition> = None;
        for projection in &self.projections {
            let position = projection.position().await.last_position;
            slowest = Some(slowest.map_or(position, |s| s.min(position)));
        }
        slowest.unwrap_or_default()
    }
}
