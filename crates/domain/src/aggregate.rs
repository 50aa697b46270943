//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded in an aggregate's stream.
///
/// Events are immutable and named in the past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored in the envelope's `event_type` column.
    fn event_type(&self) -> &'static str;
}

/// An event-sourced consistency boundary.
///
/// State is the left fold of the stream: [`Aggregate::apply`] must be pure,
/// deterministic and infallible, because it runs on every replay.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    /// Aggregate kind, stored alongside every event.
    fn aggregate_type() -> &'static str;

    /// None until the creation event has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// Version of the last applied event; 0 for an empty stream.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Aggregates whose state can be stored as a snapshot.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Layout version of the serialized state. Bump it whenever the state
    /// struct changes shape; older snapshots are then ignored and the
    /// stream is replayed from the start.
    const SCHEMA_VERSION: u32 = 1;

    /// Number of events between snapshots.
    fn snapshot_interval() -> usize {
        100
    }

    fn should_snapshot(&self) -> bool {
        self.version().as_i64() > 0
            && (self.version().as_i64() as usize).is_multiple_of(Self::snapshot_interval())
    }
}
