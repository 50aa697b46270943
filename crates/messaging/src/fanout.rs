//! Order-Placed fan-out with compensation.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::AggregateId;
use domain::{
    Aggregate, CommandContext, DomainError, DomainEvent, InventoryError, InventoryService, OrderId,
    ReleaseReservation, ReservationId, ReserveStock, Sku,
};
use event_store::{AppendOptions, EventEnvelope, EventMetadata, EventStore, EventStoreError};

use crate::allocation::{AllocationEvent, AllocationLine, AllocationState, OrderAllocation};
use crate::bus::MessagePublisher;
use crate::config::MessagingConfig;
use crate::error::{MessagingError, Result};
use crate::messages::{Envelope, InboundMessage, OrderPlaced, OutboundMessage};
use crate::warehouse::WarehouseSelector;

/// Turns one `OrderPlaced` into one reservation per distinct SKU.
///
/// Each SKU succeeds or fails on its own; there is no atomicity across the
/// order. When a SKU fails and compensation is enabled, the SKUs that were
/// reserved are released again. Progress is recorded in an
/// [`OrderAllocation`] stream, so a redelivered order resumes where the
/// previous attempt stopped and a finished one is left alone.
pub struct OrderPlacedHandler<S, P>
where
    S: EventStore,
    P: MessagePublisher,
{
    store: S,
    inventory: Arc<InventoryService<S>>,
    publisher: P,
    selector: Arc<dyn WarehouseSelector>,
    config: MessagingConfig,
}

impl<S, P> OrderPlacedHandler<S, P>
where
    S: EventStore,
    P: MessagePublisher,
{
    pub fn new(
        store: S,
        inventory: Arc<InventoryService<S>>,
        publisher: P,
        selector: Arc<dyn WarehouseSelector>,
        config: MessagingConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            publisher,
            selector,
            config,
        }
    }

    #[tracing::instrument(
        skip(self, envelope, order),
        fields(order_id = %order.order_id, message_id = %envelope.message_id)
    )]
    pub async fn handle(
        &self,
        envelope: &Envelope<InboundMessage>,
        order: &OrderPlaced,
    ) -> Result<OrderAllocation> {
        let order_id = order.order_id;
        let allocation_id = OrderAllocation::id_for(order_id);
        let mut allocation = self.get_allocation(order_id).await?.unwrap_or_default();

        if allocation.state().is_terminal() {
            tracing::debug!(state = %allocation.state(), "order already handled");
            return Ok(allocation);
        }

        let metadata = EventMetadata::correlated(envelope.correlation_id)
            .with_causation(envelope.message_id.to_string());

        if allocation.state() == AllocationState::NotStarted {
            let started = AllocationEvent::allocation_started(
                allocation_id,
                order_id,
                order.customer_id,
                self.plan(order),
            );
            self.append(allocation_id, &mut allocation, started, &metadata)
                .await?;
            metrics::counter!("messaging_order_allocations_started_total").increment(1);
        }

        if allocation.state() == AllocationState::Reserving {
            self.reserve_pending(allocation_id, &mut allocation, envelope, &metadata)
                .await?;
            self.conclude(allocation_id, &mut allocation, &metadata)
                .await?;
        }

        if allocation.state() == AllocationState::Compensating {
            self.compensate(allocation_id, &mut allocation, envelope, &metadata)
                .await?;
        }

        metrics::counter!(
            "messaging_order_allocations_total",
            "outcome" => allocation.state().as_str()
        )
        .increment(1);
        Ok(allocation)
    }

    /// Loads the allocation of an order, if one was started.
    pub async fn get_allocation(&self, order_id: OrderId) -> Result<Option<OrderAllocation>> {
        let events = self
            .store
            .read_stream(OrderAllocation::id_for(order_id))
            .await?;

        if events.is_empty() {
            return Ok(None);
        }

        let mut allocation = OrderAllocation::default();
        for envelope in events {
            let event: AllocationEvent = envelope.decode()?;
            allocation.apply(event);
            allocation.set_version(envelope.version);
        }
        Ok(Some(allocation))
    }

    /// One line per distinct SKU, quantities summed, warehouse resolved.
    fn plan(&self, order: &OrderPlaced) -> Vec<AllocationLine> {
        let mut quantities: BTreeMap<Sku, u32> = BTreeMap::new();
        for line in &order.lines {
            let total = quantities.entry(line.sku.clone()).or_default();
            *total = total.saturating_add(line.quantity);
        }

        quantities
            .into_iter()
            .map(|(sku, quantity)| AllocationLine {
                warehouse: self.selector.select(&sku),
                reservation_id: ReservationId::for_order_line(order.order_id, &sku),
                sku,
                quantity,
            })
            .collect()
    }

    async fn reserve_pending(
        &self,
        allocation_id: AggregateId,
        allocation: &mut OrderAllocation,
        envelope: &Envelope<InboundMessage>,
        metadata: &EventMetadata,
    ) -> Result<()> {
        let order_id = self.order_id_of(allocation)?;
        let pending: Vec<AllocationLine> = allocation.pending_lines().cloned().collect();

        for line in pending {
            let location = line.location();
            let cmd =
                ReserveStock::new(line.reservation_id, order_id, location.clone(), line.quantity);
            let ctx = command_context(envelope, format!("reserve:{order_id}:{}", line.sku));

            let event = match self.inventory.reserve_stock(cmd, &ctx).await {
                // A duplicate is this line's own hold from an earlier attempt.
                Ok(_) | Err(DomainError::Inventory(InventoryError::DuplicateReservation(_))) => {
                    let confirmed = OutboundMessage::confirmed(
                        order_id,
                        line.reservation_id,
                        &location,
                        line.quantity,
                    );
                    self.publisher
                        .publish(Envelope::caused_by(confirmed, envelope))
                        .await?;
                    AllocationEvent::sku_reserved(&line)
                }
                Err(DomainError::Inventory(e)) => {
                    let failed = OutboundMessage::failed(order_id, line.sku.clone(), &e);
                    self.publisher
                        .publish(Envelope::caused_by(failed, envelope))
                        .await?;
                    AllocationEvent::sku_rejected(line.sku.clone(), e.code())
                }
                Err(e) => return Err(e.into()),
            };

            self.append(allocation_id, allocation, event, metadata)
                .await?;
        }

        Ok(())
    }

    /// Decides the outcome once every line has been tried.
    async fn conclude(
        &self,
        allocation_id: AggregateId,
        allocation: &mut OrderAllocation,
        metadata: &EventMetadata,
    ) -> Result<()> {
        let event = if allocation.rejected().is_empty() {
            tracing::info!(lines = allocation.lines().len(), "order allocated");
            AllocationEvent::allocation_completed()
        } else if allocation.reserved().is_empty() {
            tracing::info!(reason = %rejection_summary(allocation), "no line could be reserved");
            AllocationEvent::allocation_failed(rejection_summary(allocation))
        } else if self.config.compensate_partial_orders {
            AllocationEvent::compensation_started(allocation.rejected().keys().cloned().collect())
        } else {
            tracing::warn!(
                reason = %rejection_summary(allocation),
                "order partially allocated, compensation disabled"
            );
            AllocationEvent::allocation_completed()
        };

        self.append(allocation_id, allocation, event, metadata).await
    }

    /// Releases every reserved line, then fails the allocation. A line
    /// that cannot be released is recorded and skipped.
    async fn compensate(
        &self,
        allocation_id: AggregateId,
        allocation: &mut OrderAllocation,
        envelope: &Envelope<InboundMessage>,
        metadata: &EventMetadata,
    ) -> Result<()> {
        let order_id = self.order_id_of(allocation)?;
        let to_release: Vec<AllocationLine> = allocation.lines_to_release().cloned().collect();

        for line in to_release {
            let cmd = ReleaseReservation::new(line.reservation_id, line.location());
            let ctx = command_context(envelope, format!("release:{order_id}:{}", line.sku));

            let event = match self.inventory.release_reservation(cmd, &ctx).await {
                Ok(result) => {
                    for released in result
                        .events
                        .iter()
                        .filter_map(OutboundMessage::from_inventory_event)
                    {
                        self.publisher
                            .publish(Envelope::caused_by(released, envelope))
                            .await?;
                    }
                    AllocationEvent::sku_released(line.sku.clone(), line.reservation_id)
                }
                // The hold is already gone: an earlier attempt released it
                // and stopped before its notification went out.
                Err(DomainError::Inventory(InventoryError::ReservationNotFound(id)))
                    if id == line.reservation_id =>
                {
                    tracing::debug!(sku = %line.sku, "line already released, notifying again");
                    let released =
                        OutboundMessage::released(order_id, line.reservation_id, line.quantity);
                    self.publisher
                        .publish(Envelope::caused_by(released, envelope))
                        .await?;
                    AllocationEvent::sku_released(line.sku.clone(), line.reservation_id)
                }
                Err(DomainError::Inventory(e)) => {
                    tracing::warn!(sku = %line.sku, error = %e, "compensation step failed");
                    AllocationEvent::compensation_step_failed(line.sku.clone(), e.code())
                }
                Err(e) => return Err(e.into()),
            };

            self.append(allocation_id, allocation, event, metadata)
                .await?;
        }

        metrics::counter!("messaging_order_compensations_total").increment(1);
        let reason = rejection_summary(allocation);
        tracing::warn!(%order_id, %reason, "order allocation compensated");
        self.append(
            allocation_id,
            allocation,
            AllocationEvent::allocation_failed(reason),
            metadata,
        )
        .await
    }

    fn order_id_of(&self, allocation: &OrderAllocation) -> Result<OrderId> {
        allocation
            .order_id()
            .ok_or(MessagingError::InvalidAllocationState {
                operation: "reserve order lines",
                actual: allocation.state(),
            })
    }

    /// Appends one event to the allocation stream and applies it.
    async fn append(
        &self,
        allocation_id: AggregateId,
        allocation: &mut OrderAllocation,
        event: AllocationEvent,
        metadata: &EventMetadata,
    ) -> Result<()> {
        if allocation.state().is_terminal() {
            return Err(MessagingError::InvalidAllocationState {
                operation: event.event_type(),
                actual: allocation.state(),
            });
        }

        let current_version = allocation.version();
        let envelope = EventEnvelope::builder()
            .event_type(event.event_type())
            .aggregate_id(allocation_id)
            .aggregate_type(OrderAllocation::AGGREGATE_TYPE)
            .version(current_version.next())
            .metadata(metadata.clone())
            .payload(&event)?
            .build()
            .map_err(|missing| EventStoreError::InvalidAppend(missing.to_string()))?;

        let new_version = self
            .store
            .append(vec![envelope], AppendOptions::expect_loaded(current_version))
            .await?;

        allocation.apply(event);
        allocation.set_version(new_version);
        Ok(())
    }
}

fn command_context(envelope: &Envelope<InboundMessage>, idempotency_key: String) -> CommandContext {
    CommandContext::new()
        .correlated(envelope.correlation_id)
        .caused_by(envelope.message_id.to_string())
        .with_idempotency_key(idempotency_key)
}

fn rejection_summary(allocation: &OrderAllocation) -> String {
    let rejected: Vec<String> = allocation
        .rejected()
        .iter()
        .map(|(sku, reason)| format!("{sku} ({reason})"))
        .collect();
    format!("rejected: {}", rejected.join(", "))
}
