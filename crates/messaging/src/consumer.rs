//! Inbound message consumption: routing, deduplication, retry and
//! dead-lettering.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    CommandContext, CommitReservation, DomainError, FulfillAllocation, InventoryEvent,
    InventoryService, ReleaseReservation,
};
use event_store::EventStore;
use tokio::sync::{broadcast, watch};

use crate::bus::MessagePublisher;
use crate::config::MessagingConfig;
use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::error::Result;
use crate::fanout::OrderPlacedHandler;
use crate::inbox::Inbox;
use crate::messages::{Envelope, InboundMessage, OutboundMessage, ReservationRef};

/// Processes one inbound message.
///
/// An `Err` means the message was not processed and may be redelivered;
/// business rejections are reported and count as processed.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope<InboundMessage>) -> Result<()>;
}

#[async_trait]
impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler + ?Sized,
{
    async fn handle(&self, envelope: &Envelope<InboundMessage>) -> Result<()> {
        (**self).handle(envelope).await
    }
}

/// Routes the messages of the Inventory context to its command handlers
/// and publishes what they did.
pub struct InventoryMessageHandler<S, P>
where
    S: EventStore,
    P: MessagePublisher,
{
    inventory: Arc<InventoryService<S>>,
    orders: OrderPlacedHandler<S, P>,
    publisher: P,
    config: MessagingConfig,
}

impl<S, P> InventoryMessageHandler<S, P>
where
    S: EventStore,
    P: MessagePublisher,
{
    pub fn new(
        inventory: Arc<InventoryService<S>>,
        orders: OrderPlacedHandler<S, P>,
        publisher: P,
        config: MessagingConfig,
    ) -> Self {
        Self {
            inventory,
            orders,
            publisher,
            config,
        }
    }

    pub fn orders(&self) -> &OrderPlacedHandler<S, P> {
        &self.orders
    }

    async fn commit(&self, envelope: &Envelope<InboundMessage>, target: &ReservationRef) -> Result<()> {
        let cmd = CommitReservation::new(target.reservation_id, target.location());
        let ctx = command_context(envelope, "commit");
        let result = self.inventory.commit_reservation(cmd, &ctx).await;
        self.report(envelope, target, result.map(|r| r.events)).await
    }

    async fn release(&self, envelope: &Envelope<InboundMessage>, target: &ReservationRef) -> Result<()> {
        let cmd = ReleaseReservation::new(target.reservation_id, target.location());
        let ctx = command_context(envelope, "release");
        let result = self.inventory.release_reservation(cmd, &ctx).await;
        self.report(envelope, target, result.map(|r| r.events)).await
    }

    async fn fulfill(&self, envelope: &Envelope<InboundMessage>, target: &ReservationRef) -> Result<()> {
        if !self.config.prune_fulfilled_allocations {
            tracing::debug!(reservation_id = %target.reservation_id, "fulfillment pruning disabled");
            return Ok(());
        }

        let cmd = FulfillAllocation::new(target.reservation_id, target.location());
        let ctx = command_context(envelope, "fulfill");
        let result = self.inventory.fulfill_allocation(cmd, &ctx).await;
        self.report(envelope, target, result.map(|r| r.events)).await
    }

    /// Publishes the notifications for the emitted events. A rejected
    /// command is logged and acknowledged; infrastructure failures are
    /// returned for redelivery.
    async fn report(
        &self,
        envelope: &Envelope<InboundMessage>,
        target: &ReservationRef,
        result: std::result::Result<Vec<InventoryEvent>, DomainError>,
    ) -> Result<()> {
        match result {
            Ok(events) => {
                for message in events.iter().filter_map(OutboundMessage::from_inventory_event) {
                    self.publisher
                        .publish(Envelope::caused_by(message, envelope))
                        .await?;
                }
                Ok(())
            }
            Err(DomainError::Inventory(e)) => {
                tracing::warn!(
                    reservation_id = %target.reservation_id,
                    message_type = envelope.payload.message_type(),
                    reason = e.code(),
                    "command rejected"
                );
                metrics::counter!(
                    "messaging_commands_rejected_total",
                    "reason" => e.code()
                )
                .increment(1);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<S, P> MessageHandler for InventoryMessageHandler<S, P>
where
    S: EventStore,
    P: MessagePublisher,
{
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            message_id = %envelope.message_id,
            message_type = envelope.payload.message_type(),
            correlation_id = %envelope.correlation_id
        )
    )]
    async fn handle(&self, envelope: &Envelope<InboundMessage>) -> Result<()> {
        match &envelope.payload {
            InboundMessage::OrderPlaced(order) => {
                self.orders.handle(envelope, order).await?;
                Ok(())
            }
            InboundMessage::ReservationCommitRequested(target) => {
                self.commit(envelope, target).await
            }
            InboundMessage::ReservationReleaseRequested(target) => {
                self.release(envelope, target).await
            }
            InboundMessage::FulfillmentCompleted(target) => self.fulfill(envelope, target).await,
        }
    }
}

/// Keyed by the message, so a redelivery replays the first outcome while a
/// new request for the same reservation is decided afresh.
fn command_context(envelope: &Envelope<InboundMessage>, operation: &str) -> CommandContext {
    CommandContext::new()
        .correlated(envelope.correlation_id)
        .caused_by(envelope.message_id.to_string())
        .with_idempotency_key(format!("{operation}:{}", envelope.message_id))
}

/// What became of one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Processed,
    /// Already processed; dropped by the inbox.
    Duplicate,
    DeadLettered,
}

/// Delivers inbound messages to a handler with at-least-once semantics.
///
/// Transient failures are retried under the delivery policy; after the
/// last attempt, and on the first non-transient failure, the message goes
/// to the dead-letter queue.
pub struct MessageConsumer<H: MessageHandler> {
    handler: H,
    inbox: Arc<dyn Inbox>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    config: MessagingConfig,
}

impl<H: MessageHandler> MessageConsumer<H> {
    pub fn new(
        handler: H,
        inbox: Arc<dyn Inbox>,
        dead_letters: Arc<dyn DeadLetterQueue>,
        config: MessagingConfig,
    ) -> Self {
        Self {
            handler,
            inbox,
            dead_letters,
            config,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    #[tracing::instrument(
        skip(self, envelope),
        fields(message_id = %envelope.message_id, message_type = envelope.payload.message_type())
    )]
    pub async fn deliver(&self, envelope: Envelope<InboundMessage>) -> DeliveryOutcome {
        let message_type = envelope.payload.message_type();
        metrics::counter!("messaging_messages_received_total", "type" => message_type)
            .increment(1);

        if self.config.dedup_enabled && self.inbox.contains(envelope.message_id).await {
            tracing::debug!("duplicate delivery dropped");
            metrics::counter!("messaging_messages_duplicate_total", "type" => message_type)
                .increment(1);
            return DeliveryOutcome::Duplicate;
        }

        let policy = self.config.delivery_retry;
        let mut current = envelope;
        loop {
            let attempt = current.attempt;
            match self.handler.handle(&current).await {
                Ok(()) => {
                    if self.config.dedup_enabled {
                        self.inbox.record(current.message_id).await;
                    }
                    metrics::counter!("messaging_messages_processed_total", "type" => message_type)
                        .increment(1);
                    return DeliveryOutcome::Processed;
                }
                Err(e) if e.is_transient() && policy.allows_retry(attempt) => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "delivery failed, retrying");
                    metrics::counter!("messaging_delivery_retries_total", "type" => message_type)
                        .increment(1);
                    tokio::time::sleep(delay).await;
                    current = current.redelivered();
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "message dead-lettered");
                    metrics::counter!(
                        "messaging_messages_dead_lettered_total",
                        "type" => message_type
                    )
                    .increment(1);
                    self.dead_letters
                        .push(DeadLetter::new(current, e.to_string(), attempt))
                        .await;
                    return DeliveryOutcome::DeadLettered;
                }
            }
        }
    }

    /// Consumes `messages` until the channel closes or `shutdown` flips to
    /// true.
    pub async fn run(
        &self,
        mut messages: broadcast::Receiver<Envelope<InboundMessage>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("message consumer started");
        loop {
            tokio::select! {
                received = messages.recv() => match received {
                    Ok(envelope) => {
                        self.deliver(envelope).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "consumer lagged, messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("message consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use domain::{ReservationId, RetryPolicy, StockLocation};

    use crate::dead_letter::InMemoryDeadLetterQueue;
    use crate::error::MessagingError;
    use crate::inbox::InMemoryInbox;

    /// Fails the first `failures` calls with the given error kind.
    struct Flaky {
        failures: u32,
        transient: bool,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, transient: bool) -> Self {
            Self {
                failures,
                transient,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(&self, _envelope: &Envelope<InboundMessage>) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call > self.failures {
                return Ok(());
            }
            if self.transient {
                Err(MessagingError::Publish("broker down".into()))
            } else {
                Err(MessagingError::Serialization(
                    serde_json::from_str::<u32>("nope").unwrap_err(),
                ))
            }
        }
    }

    fn consumer(
        handler: Flaky,
        config: MessagingConfig,
    ) -> (MessageConsumer<Arc<Flaky>>, Arc<Flaky>, InMemoryDeadLetterQueue) {
        let handler = Arc::new(handler);
        let dead_letters = InMemoryDeadLetterQueue::new();
        let consumer = MessageConsumer::new(
            handler.clone(),
            Arc::new(InMemoryInbox::new()),
            Arc::new(dead_letters.clone()),
            config.with_delivery_retry(RetryPolicy::new(3).with_backoff(
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(2),
            )),
        );
        (consumer, handler, dead_letters)
    }

    fn commit_request() -> Envelope<InboundMessage> {
        Envelope::new(InboundMessage::ReservationCommitRequested(ReservationRef::new(
            ReservationId::new(),
            &StockLocation::new("SKU-001", "WH-01"),
        )))
    }

    #[tokio::test]
    async fn duplicates_are_dropped_when_dedup_is_enabled() {
        let (consumer, handler, _) = consumer(Flaky::new(0, true), MessagingConfig::default());
        let envelope = commit_request();

        assert_eq!(consumer.deliver(envelope.clone()).await, DeliveryOutcome::Processed);
        assert_eq!(consumer.deliver(envelope.redelivered()).await, DeliveryOutcome::Duplicate);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn duplicates_are_processed_when_dedup_is_disabled() {
        let config = MessagingConfig::default().with_dedup(false);
        let (consumer, handler, _) = consumer(Flaky::new(0, true), config);
        let envelope = commit_request();

        consumer.deliver(envelope.clone()).await;
        assert_eq!(consumer.deliver(envelope).await, DeliveryOutcome::Processed);
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (consumer, handler, dead_letters) =
            consumer(Flaky::new(2, true), MessagingConfig::default());

        assert_eq!(consumer.deliver(commit_request()).await, DeliveryOutcome::Processed);
        assert_eq!(handler.calls(), 3);
        assert!(dead_letters.is_empty().await);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_the_message() {
        let (consumer, handler, dead_letters) =
            consumer(Flaky::new(10, true), MessagingConfig::default());
        let envelope = commit_request();

        assert_eq!(consumer.deliver(envelope.clone()).await, DeliveryOutcome::DeadLettered);
        assert_eq!(handler.calls(), 3);

        let letters = dead_letters.list().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].envelope.message_id, envelope.message_id);
        assert!(letters[0].error.contains("broker down"));

        // Not recorded as processed, so a manual redelivery is handled.
        assert_eq!(consumer.deliver(envelope).await, DeliveryOutcome::Processed);
    }

    #[tokio::test]
    async fn permanent_failures_are_dead_lettered_at_once() {
        let (consumer, handler, dead_letters) =
            consumer(Flaky::new(1, false), MessagingConfig::default());

        assert_eq!(consumer.deliver(commit_request()).await, DeliveryOutcome::DeadLettered);
        assert_eq!(handler.calls(), 1);
        assert_eq!(dead_letters.len().await, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (consumer, handler, _) = consumer(Flaky::new(0, true), MessagingConfig::default());
        let (tx, rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(commit_request()).unwrap();
        let consumer = Arc::new(consumer);
        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx, shutdown_rx).await }
        });

        while handler.calls() == 0 {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
