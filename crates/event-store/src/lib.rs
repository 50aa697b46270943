//! Append-only event storage.
//!
//! Streams are keyed by [`AggregateId`] and versioned from 1. Every appended
//! event also receives a store-wide [`GlobalPosition`] so that read models can
//! follow all streams in commit order.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::{AggregateId, CorrelationId};
pub use error::{EventStoreError, Result};
pub use event::{
    EventEnvelope, EventEnvelopeBuilder, EventId, EventMetadata, GlobalPosition, MissingField,
    Version,
};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use snapshot::Snapshot;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream, ExpectedVersion};
