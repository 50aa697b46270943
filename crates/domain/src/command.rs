//! Command handling infrastructure.

use std::marker::PhantomData;

use common::{AggregateId, CorrelationId};
use event_store::{
    AppendOptions, EventEnvelope, EventMetadata, EventStore, EventStoreExt, Snapshot, Version,
};

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};
use crate::error::DomainError;
use crate::retry::RetryPolicy;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// Stream version after the command.
    pub new_version: Version,

    /// True when the events were replayed from a recorded outcome instead of
    /// being decided now. `aggregate` is then the current state, which may be
    /// ahead of `new_version`.
    pub replayed: bool,
}

/// Where a command came from.
///
/// The correlation and causation ids end up in the metadata of every
/// event the command emits.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<String>,
    /// Repeated keys replay the first recorded outcome.
    pub idempotency_key: Option<String>,
}

impl CommandContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correlated(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn caused_by(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            correlation_id: self.correlation_id,
            causation_id: self.causation_id.clone(),
            ..Default::default()
        }
    }
}

/// A command addressed to a single aggregate stream.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn aggregate_id(&self) -> AggregateId;
}

/// Runs the read-decide-append cycle for one aggregate type.
///
/// 1. Load the aggregate (latest snapshot plus the events after it)
/// 2. Let the command decide which events to emit
/// 3. Append them on the condition that the stream is still at the loaded
///    version
/// 4. On a version conflict, start over from 1 under the retry policy
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
{
    store: S,
    retry: RetryPolicy,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            _phantom: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Loads an aggregate, returning a default instance for an empty stream.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let (snapshot, events) = self.store.load_aggregate(aggregate_id).await?;

        let (mut aggregate, events) = match snapshot {
            Some(snapshot) => match self.restore_from_snapshot(&snapshot)? {
                Some(aggregate) => (aggregate, events),
                // Stale schema: replay everything.
                None => (A::default(), self.store.read_stream(aggregate_id).await?),
            },
            None => (A::default(), events),
        };

        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if its stream is empty.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Executes a command with empty event metadata.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.execute_with(aggregate_id, EventMetadata::default(), command_fn)
            .await
    }

    /// Executes a command, stamping `metadata` on every emitted event.
    ///
    /// `command_fn` may run several times: once per attempt, each time
    /// against freshly loaded state.
    pub async fn execute_with<F>(
        &self,
        aggregate_id: AggregateId,
        metadata: EventMetadata,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 1;
        loop {
            match self.try_execute(aggregate_id, &metadata, &command_fn).await {
                Err(DomainError::EventStore(e)) if e.is_conflict() => {
                    if !self.retry.allows_retry(attempt) {
                        if self.retry.max_attempts == 1 {
                            return Err(e.into());
                        }
                        tracing::warn!(%aggregate_id, attempt, "giving up after repeated conflicts");
                        return Err(DomainError::RetriesExhausted {
                            aggregate_id,
                            attempts: attempt,
                        });
                    }

                    metrics::counter!(
                        "inventory_concurrency_retries_total",
                        "aggregate_type" => A::aggregate_type()
                    )
                    .increment(1);
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(%aggregate_id, attempt, ?delay, "version conflict, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_execute<F>(
        &self,
        aggregate_id: AggregateId,
        metadata: &EventMetadata,
        command_fn: &F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;
        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events,
                new_version: current_version,
                replayed: false,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, metadata, &events)?;
        let new_version = self
            .store
            .append(envelopes, AppendOptions::expect_loaded(current_version))
            .await?;

        aggregate.apply_events(events.iter().cloned());
        aggregate.set_version(new_version);

        if aggregate.should_snapshot() {
            self.save_snapshot(aggregate_id, &aggregate).await;
        }

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
            replayed: false,
        })
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        metadata: &EventMetadata,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut version = current_version;
        events
            .iter()
            .map(|event| -> Result<EventEnvelope, DomainError> {
                version = version.next();
                let envelope = EventEnvelope::builder()
                    .aggregate_id(aggregate_id)
                    .aggregate_type(A::aggregate_type())
                    .event_type(event.event_type())
                    .version(version)
                    .metadata(metadata.clone())
                    .payload(event)?
                    .build()
                    .map_err(|missing| {
                        event_store::EventStoreError::InvalidAppend(missing.to_string())
                    })?;
                Ok(envelope)
            })
            .collect()
    }

    fn restore_from_snapshot(&self, snapshot: &Snapshot) -> Result<Option<A>, DomainError> {
        let restored: Option<A> = snapshot.restore(A::SCHEMA_VERSION)?;
        Ok(restored.map(|mut aggregate| {
            aggregate.set_version(snapshot.version);
            aggregate
        }))
    }

    /// The events are already committed, so a failed snapshot only costs
    /// replay time on the next load.
    async fn save_snapshot(&self, aggregate_id: AggregateId, aggregate: &A) {
        let snapshot = match Snapshot::capture(
            aggregate_id,
            A::aggregate_type(),
            aggregate.version(),
            A::SCHEMA_VERSION,
            aggregate,
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(%aggregate_id, error = %e, "failed to serialize snapshot");
                return;
            }
        };

        if let Err(e) = self.store.save_snapshot(snapshot).await {
            tracing::warn!(%aggregate_id, error = %e, "failed to save snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum TallyEvent {
        Opened { id: AggregateId },
        Counted { amount: u32 },
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Opened { .. } => "TallyOpened",
                TallyEvent::Counted { .. } => "TallyCounted",
            }
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Tally {
        id: Option<AggregateId>,
        total: u32,
        #[serde(skip)]
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("tally is closed")]
    struct TallyClosed;

    impl From<TallyClosed> for DomainError {
        fn from(_: TallyClosed) -> Self {
            DomainError::Inventory(crate::inventory::InventoryError::InventoryNotInitialized)
        }
    }

    impl Aggregate for Tally {
        type Event = TallyEvent;
        type Error = TallyClosed;

        fn aggregate_type() -> &'static str {
            "Tally"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TallyEvent::Opened { id } => self.id = Some(id),
                TallyEvent::Counted { amount } => self.total += amount,
            }
        }
    }

    impl SnapshotCapable for Tally {
        fn snapshot_interval() -> usize {
            3
        }
    }

    fn open(id: AggregateId) -> impl Fn(&Tally) -> Result<Vec<TallyEvent>, TallyClosed> {
        move |_| Ok(vec![TallyEvent::Opened { id }])
    }

    fn count(amount: u32) -> impl Fn(&Tally) -> Result<Vec<TallyEvent>, TallyClosed> {
        move |_| Ok(vec![TallyEvent::Counted { amount }])
    }

    #[tokio::test]
    async fn execute_appends_and_applies() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        handler.execute(id, open(id)).await.unwrap();
        let result = handler.execute(id, count(4)).await.unwrap();

        assert_eq!(result.new_version, Version::new(2));
        assert_eq!(result.aggregate.total, 4);
        assert_eq!(handler.load(id).await.unwrap().total, 4);
    }

    #[tokio::test]
    async fn rejected_command_appends_nothing() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());

        let result = handler.execute(AggregateId::new(), |_| Err(TallyClosed)).await;

        assert!(matches!(result, Err(DomainError::Inventory(_))));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn empty_decision_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());

        let result = handler.execute(AggregateId::new(), |_| Ok(vec![])).await.unwrap();

        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn load_existing_distinguishes_empty_streams() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();
        assert!(handler.load_existing(id).await.unwrap().is_none());

        handler.execute(id, open(id)).await.unwrap();
        assert!(handler.load_existing(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn snapshot_is_taken_and_used() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();

        handler.execute(id, open(id)).await.unwrap();
        handler.execute(id, count(1)).await.unwrap();
        handler.execute(id, count(2)).await.unwrap();
        handler.execute(id, count(3)).await.unwrap();

        let snapshot = store.get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.version, Version::new(3));

        let tally = handler.load(id).await.unwrap();
        assert_eq!(tally.total, 6);
        assert_eq!(tally.version(), Version::new(4));
    }

    #[tokio::test]
    async fn stale_snapshot_schema_falls_back_to_replay() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();

        handler.execute(id, open(id)).await.unwrap();
        handler.execute(id, count(5)).await.unwrap();
        let bogus = Snapshot::capture(id, "Tally", Version::new(2), 99, &serde_json::json!({}))
            .unwrap();
        store.save_snapshot(bogus).await.unwrap();

        let tally = handler.load(id).await.unwrap();
        assert_eq!(tally.total, 5);
        assert_eq!(tally.id, Some(id));
    }

    #[tokio::test]
    async fn metadata_is_stamped_on_events() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();
        let correlation_id = common::CorrelationId::new();

        handler
            .execute_with(
                id,
                EventMetadata::correlated(correlation_id).with_causation("msg-1"),
                open(id),
            )
            .await
            .unwrap();

        let events = store.read_stream(id).await.unwrap();
        assert_eq!(events[0].metadata.correlation_id, Some(correlation_id));
        assert_eq!(events[0].metadata.causation_id.as_deref(), Some("msg-1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commands_are_retried_not_lost() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        CommandHandler::<_, Tally>::new(store.clone())
            .execute(id, open(id))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone())
                .with_retry_policy(RetryPolicy::new(50).with_backoff(
                    std::time::Duration::from_millis(1),
                    std::time::Duration::from_millis(5),
                ));
            handles.push(tokio::spawn(async move {
                handler.execute(id, count(1)).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let handler: CommandHandler<_, Tally> = CommandHandler::new(store);
        assert_eq!(handler.load(id).await.unwrap().total, 8);
    }
}
