use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, GlobalPosition, Result, Snapshot,
    Version,
};

/// What the writer believes the stream's version to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedVersion {
    /// Append regardless of the current version.
    #[default]
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must be at exactly this version.
    Exact(Version),
}

impl ExpectedVersion {
    /// Expectation for a writer that loaded the stream at `version`.
    pub fn from_loaded(version: Version) -> Self {
        if version == Version::initial() {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    /// Returns true when a stream currently at `actual` satisfies this expectation.
    pub fn accepts(&self, actual: Version) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => actual == Version::initial(),
            ExpectedVersion::Exact(expected) => *expected == actual,
        }
    }
}

impl std::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any version"),
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::Exact(version) => write!(f, "version {version}"),
        }
    }
}

/// Options for appending events to the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    pub expected: ExpectedVersion,
}

impl AppendOptions {
    /// No version check. Only for tooling and tests.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected: ExpectedVersion::Exact(version),
        }
    }

    pub fn expect_new() -> Self {
        Self {
            expected: ExpectedVersion::NoStream,
        }
    }

    pub fn expect_loaded(version: Version) -> Self {
        Self {
            expected: ExpectedVersion::from_loaded(version),
        }
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Persistence contract for event streams.
///
/// Implementations must make the version check and the write a single atomic
/// step: two writers that loaded the same version can never both succeed.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events to one stream.
    ///
    /// The batch is all-or-nothing. Returns the stream version after the
    /// last event. Fails with [`EventStoreError::ConcurrencyConflict`] when
    /// `options.expected` does not hold.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// All events of one stream in version order.
    async fn read_stream(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Events of one stream with `version >= from_version`.
    async fn read_stream_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Up to `limit` events across all streams strictly after `after`.
    async fn read_all_from(
        &self,
        after: GlobalPosition,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>>;

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Streams every event in global position order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Current version of a stream, or None if it has no events.
    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// IDs of every stream of the given aggregate type.
    async fn list_streams(&self, aggregate_type: &str) -> Result<Vec<AggregateId>>;

    /// Stores a snapshot, replacing any previous one for the aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

/// Convenience methods available on every [`EventStore`].
#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn stream_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.stream_version(aggregate_id).await?.is_some())
    }

    /// Loads the latest snapshot (if any) and the events recorded after it.
    async fn load_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        match self.get_snapshot(aggregate_id).await? {
            Some(snapshot) => {
                let events = self
                    .read_stream_from(aggregate_id, snapshot.version.next())
                    .await?;
                Ok((Some(snapshot), events))
            }
            None => Ok((None, self.read_stream(aggregate_id).await?)),
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks the shape of a batch before any store touches it.
///
/// The batch must be non-empty, target a single stream and carry
/// consecutive versions.
pub fn validate_batch(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "a batch must target a single stream".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be consecutive: expected {expected_version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

/// Checks that the batch continues a stream currently at `current`.
pub(crate) fn check_continuation(
    events: &[EventEnvelope],
    options: AppendOptions,
    current: Version,
) -> Result<()> {
    let aggregate_id = events[0].aggregate_id;

    if !options.expected.accepts(current) || events[0].version != current.next() {
        return Err(EventStoreError::ConcurrencyConflict {
            aggregate_id,
            expected: options.expected,
            actual: current,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("ProductInventory")
            .event_type("StockReceived")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn expected_version_from_loaded() {
        assert_eq!(
            ExpectedVersion::from_loaded(Version::initial()),
            ExpectedVersion::NoStream
        );
        assert_eq!(
            ExpectedVersion::from_loaded(Version::new(4)),
            ExpectedVersion::Exact(Version::new(4))
        );
    }

    #[test]
    fn expected_version_accepts() {
        assert!(ExpectedVersion::Any.accepts(Version::new(9)));
        assert!(ExpectedVersion::NoStream.accepts(Version::initial()));
        assert!(!ExpectedVersion::NoStream.accepts(Version::first()));
        assert!(!ExpectedVersion::Exact(Version::new(2)).accepts(Version::new(3)));
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_batch(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn mixed_streams_are_rejected() {
        let batch = vec![event(AggregateId::new(), 1), event(AggregateId::new(), 2)];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn gaps_in_versions_are_rejected() {
        let id = AggregateId::new();
        let batch = vec![event(id, 1), event(id, 3)];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn continuation_must_start_after_current() {
        let id = AggregateId::new();
        let batch = vec![event(id, 3)];
        assert!(check_continuation(&batch, AppendOptions::any(), Version::new(2)).is_ok());

        let err = check_continuation(&batch, AppendOptions::any(), Version::new(3)).unwrap_err();
        assert!(err.is_conflict());
    }
}
