//! Reservations read model: every reservation with its lifecycle status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    InventoryEvent, OrderId, ProductInventory, ReservationId, ReservationStatus, StockLocation,
};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// One reservation as seen by operators.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRecord {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub location: StockLocation,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct ReservationsState {
    reservations: HashMap<ReservationId, ReservationRecord>,
    /// Location of every initialized inventory stream.
    locations: HashMap<AggregateId, StockLocation>,
    by_order: HashMap<OrderId, Vec<ReservationId>>,
    position: ProjectionPosition,
}

impl ReservationsState {
    fn transition(
        &mut self,
        reservation_id: ReservationId,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) {
        match self.reservations.get_mut(&reservation_id) {
            Some(record) => {
                record.status = status;
                record.updated_at = at;
            }
            None => tracing::warn!(%reservation_id, %status, "transition for unknown reservation"),
        }
    }
}

/// Read model view for reservations, including finished ones.
#[derive(Clone, Default)]
pub struct ReservationsView {
    state: Arc<RwLock<ReservationsState>>,
}

impl ReservationsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, reservation_id: ReservationId) -> Option<ReservationRecord> {
        self.state
            .read()
            .await
            .reservations
            .get(&reservation_id)
            .cloned()
    }

    /// Reservations of one order, in the order they were made.
    pub async fn for_order(&self, order_id: OrderId) -> Vec<ReservationRecord> {
        let state = self.state.read().await;
        state
            .by_order
            .get(&order_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.reservations.get(id).cloned())
            .collect()
    }

    pub async fn with_status(&self, status: ReservationStatus) -> Vec<ReservationRecord> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.reserved_at);
        records
    }

    /// Soft holds whose expiry is at or before `now`.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Vec<ReservationRecord> {
        self.with_status(ReservationStatus::Reserved)
            .await
            .into_iter()
            .filter(|r| r.expires_at.is_some_and(|at| at <= now))
            .collect()
    }

    /// Reservations still holding stock.
    pub async fn active_count(&self) -> usize {
        self.state
            .read()
            .await
            .reservations
            .values()
            .filter(|r| r.status.holds_stock())
            .count()
    }
}

#[async_trait]
impl Projection for ReservationsView {
    fn name(&self) -> &'static str {
        "ReservationsView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance(event.position);

        if event.aggregate_type != ProductInventory::AGGREGATE_TYPE {
            return Ok(());
        }

        match event.decode::<InventoryEvent>()? {
            InventoryEvent::InventoryInitialized(data) => {
                state
                    .locations
                    .insert(event.aggregate_id, StockLocation::new(data.sku, data.warehouse));
            }
            InventoryEvent::StockReceived(_) | InventoryEvent::StockRestocked(_) => {}
            InventoryEvent::StockReserved(data) => {
                let Some(location) = state.locations.get(&event.aggregate_id).cloned() else {
                    tracing::warn!(aggregate_id = %event.aggregate_id, "reservation on unknown inventory");
                    return Ok(());
                };
                state
                    .by_order
                    .entry(data.order_id)
                    .or_default()
                    .push(data.reservation_id);
                state.reservations.insert(
                    data.reservation_id,
                    ReservationRecord {
                        reservation_id: data.reservation_id,
                        order_id: data.order_id,
                        location,
                        quantity: data.quantity,
                        status: ReservationStatus::Reserved,
                        reserved_at: data.reserved_at,
                        expires_at: data.expires_at,
                        updated_at: data.reserved_at,
                    },
                );
            }
            InventoryEvent::ReservationCommitted(data) => {
                state.transition(data.reservation_id, ReservationStatus::Committed, data.occurred_at)
            }
            InventoryEvent::ReservationReleased(data) => {
                state.transition(data.reservation_id, ReservationStatus::Released, data.occurred_at)
            }
            InventoryEvent::ReservationExpired(data) => {
                state.transition(data.reservation_id, ReservationStatus::Expired, data.occurred_at)
            }
            InventoryEvent::AllocationFulfilled(data) => {
                state.transition(data.reservation_id, ReservationStatus::Fulfilled, data.occurred_at)
            }
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = ReservationsState::default();
        Ok(())
    }
}

impl ReadModel for ReservationsView {
    fn name(&self) -> &'static str {
        "ReservationsView"
    }

    fn count(&self) -> usize {
        self.state
            .try_read()
            .map(|s| s.reservations.len())
            .unwrap_or(0)
    }
}
