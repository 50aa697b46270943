//! ProductInventory aggregate implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, SnapshotCapable};

use super::{
    InventoryError, InventoryEvent, OrderId, ReservationId, ReservationStatus, StockLocation,
    events::{ReservationData, StockReservedData},
};

/// Stock of one SKU at one warehouse, split into three pools.
///
/// * `available`: free for new reservations
/// * reserved: soft holds that can still be released
/// * committed: hard allocations awaiting fulfillment
///
/// `available + reserved + committed` only grows through received or
/// restocked stock and only shrinks through fulfillment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInventory {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    location: Option<StockLocation>,

    available: u32,

    /// Soft holds by reservation.
    reservations: BTreeMap<ReservationId, u32>,

    /// Hard allocations by reservation.
    committed_allocations: BTreeMap<ReservationId, u32>,

    /// Originating order of every live reservation.
    reservation_order_ids: BTreeMap<ReservationId, OrderId>,

    /// Only populated when reservations have a time-to-live.
    #[serde(default)]
    reservation_expiries: BTreeMap<ReservationId, DateTime<Utc>>,
}

impl ProductInventory {
    pub const AGGREGATE_TYPE: &'static str = "ProductInventory";
}

impl Aggregate for ProductInventory {
    type Event = InventoryEvent;
    type Error = InventoryError;

    fn aggregate_type() -> &'static str {
        Self::AGGREGATE_TYPE
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
            InventoryEvent::InventoryInitialized(data) => {
                self.id = Some(data.inventory_id);
                self.location = Some(StockLocation {
                    sku: data.sku,
                    warehouse: data.warehouse,
                });
                self.available = data.initial_quantity;
            }
            InventoryEvent::StockReceived(data) | InventoryEvent::StockRestocked(data) => {
                self.available = self.available.saturating_add(data.quantity);
            }
            InventoryEvent::StockReserved(data) => self.apply_stock_reserved(data),
            InventoryEvent::ReservationCommitted(data) => {
                if let Some(quantity) = self.reservations.remove(&data.reservation_id) {
                    self.reservation_expiries.remove(&data.reservation_id);
                    self.committed_allocations
                        .insert(data.reservation_id, quantity);
                }
            }
            InventoryEvent::ReservationReleased(data) | InventoryEvent::ReservationExpired(data) => {
                self.apply_hold_returned(data)
            }
            InventoryEvent::AllocationFulfilled(data) => {
                self.committed_allocations.remove(&data.reservation_id);
                self.reservation_order_ids.remove(&data.reservation_id);
            }
        }
    }
}

impl SnapshotCapable for ProductInventory {
    fn snapshot_interval() -> usize {
        50
    }
}

// Query methods
impl ProductInventory {
    pub fn location(&self) -> Option<&StockLocation> {
        self.location.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.id.is_some()
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn reserved(&self) -> u32 {
        self.reservations.values().sum()
    }

    pub fn committed(&self) -> u32 {
        self.committed_allocations.values().sum()
    }

    /// Physical stock: every unit that has not left the warehouse.
    pub fn total_on_hand(&self) -> u64 {
        u64::from(self.available) + u64::from(self.reserved()) + u64::from(self.committed())
    }

    /// Quantity soft-held by a reservation.
    pub fn reservation(&self, reservation_id: ReservationId) -> Option<u32> {
        self.reservations.get(&reservation_id).copied()
    }

    /// Quantity hard-allocated to a committed reservation.
    pub fn committed_allocation(&self, reservation_id: ReservationId) -> Option<u32> {
        self.committed_allocations.get(&reservation_id).copied()
    }

    pub fn order_for(&self, reservation_id: ReservationId) -> Option<OrderId> {
        self.reservation_order_ids.get(&reservation_id).copied()
    }

    pub fn expiry_of(&self, reservation_id: ReservationId) -> Option<DateTime<Utc>> {
        self.reservation_expiries.get(&reservation_id).copied()
    }

    /// Status of a live reservation; None once it has been settled.
    pub fn reservation_status(&self, reservation_id: ReservationId) -> Option<ReservationStatus> {
        if self.reservations.contains_key(&reservation_id) {
            Some(ReservationStatus::Reserved)
        } else if self.committed_allocations.contains_key(&reservation_id) {
            Some(ReservationStatus::Committed)
        } else {
            None
        }
    }

    pub fn reservations(&self) -> impl Iterator<Item = (ReservationId, u32)> + '_ {
        self.reservations.iter().map(|(id, qty)| (*id, *qty))
    }

    pub fn committed_allocations(&self) -> impl Iterator<Item = (ReservationId, u32)> + '_ {
        self.committed_allocations.iter().map(|(id, qty)| (*id, *qty))
    }

    /// Earliest expiry among soft holds.
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.reservation_expiries.values().min().copied()
    }
}

// Command methods (return events)
impl ProductInventory {
    pub fn initialize(
        &self,
        location: &StockLocation,
        initial_quantity: u32,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        if self.is_initialized() {
            return Err(InventoryError::AlreadyExists(location.clone()));
        }

        Ok(vec![InventoryEvent::inventory_initialized(
            location,
            initial_quantity,
        )])
    }

    pub fn receive(&self, quantity: u32) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.check_addition(quantity)?;
        Ok(vec![InventoryEvent::stock_received(quantity)])
    }

    pub fn restock(&self, quantity: u32) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.check_addition(quantity)?;
        Ok(vec![InventoryEvent::stock_restocked(quantity)])
    }

    /// Places a soft hold of `quantity` units.
    ///
    /// All or nothing: a request larger than the available pool is rejected
    /// without holding anything.
    pub fn reserve(
        &self,
        reservation_id: ReservationId,
        order_id: OrderId,
        quantity: u32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_initialized()?;

        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity { quantity });
        }
        if self.reservation_status(reservation_id).is_some() {
            return Err(InventoryError::DuplicateReservation(reservation_id));
        }
        if quantity > self.available {
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available: self.available,
            });
        }

        Ok(vec![InventoryEvent::stock_reserved(
            reservation_id,
            order_id,
            quantity,
            expires_at,
        )])
    }

    /// Turns a soft hold into a hard allocation.
    pub fn commit(&self, reservation_id: ReservationId) -> Result<Vec<InventoryEvent>, InventoryError> {
        let quantity = self.soft_hold(reservation_id)?;
        Ok(vec![InventoryEvent::reservation_committed(
            reservation_id,
            self.order_of(reservation_id),
            quantity,
        )])
    }

    /// Returns a soft hold to the available pool.
    pub fn release(&self, reservation_id: ReservationId) -> Result<Vec<InventoryEvent>, InventoryError> {
        let quantity = self.soft_hold(reservation_id)?;
        Ok(vec![InventoryEvent::reservation_released(
            reservation_id,
            self.order_of(reservation_id),
            quantity,
        )])
    }

    /// Expires every soft hold whose expiry is at or before `now`.
    ///
    /// Returns no events when nothing is due, including when reservations
    /// were made without a time-to-live.
    pub fn expire_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_initialized()?;

        Ok(self
            .reservation_expiries
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .filter_map(|(reservation_id, _)| {
                let quantity = self.reservation(*reservation_id)?;
                Some(InventoryEvent::reservation_expired(
                    *reservation_id,
                    self.order_of(*reservation_id),
                    quantity,
                    now,
                ))
            })
            .collect())
    }

    /// Removes a hard allocation that has shipped.
    pub fn fulfill(&self, reservation_id: ReservationId) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_initialized()?;

        let quantity = self
            .committed_allocation(reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;

        Ok(vec![InventoryEvent::allocation_fulfilled(
            reservation_id,
            self.order_of(reservation_id),
            quantity,
        )])
    }

    fn ensure_initialized(&self) -> Result<(), InventoryError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(InventoryError::InventoryNotInitialized)
        }
    }

    fn check_addition(&self, quantity: u32) -> Result<(), InventoryError> {
        self.ensure_initialized()?;
        if quantity == 0 || self.total_on_hand() + u64::from(quantity) > u64::from(u32::MAX) {
            return Err(InventoryError::InvalidQuantity { quantity });
        }
        Ok(())
    }

    /// Quantity of a reservation that is still a soft hold.
    fn soft_hold(&self, reservation_id: ReservationId) -> Result<u32, InventoryError> {
        self.ensure_initialized()?;

        if self.committed_allocations.contains_key(&reservation_id) {
            return Err(InventoryError::AlreadyCommitted(reservation_id));
        }
        self.reservation(reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))
    }

    fn order_of(&self, reservation_id: ReservationId) -> OrderId {
        // Every live reservation is recorded with its order on StockReserved.
        self.reservation_order_ids
            .get(&reservation_id)
            .copied()
            .unwrap_or_else(|| OrderId::from_uuid(uuid::Uuid::nil()))
    }
}

// Apply event helpers
impl ProductInventory {
    fn apply_stock_reserved(&mut self, data: StockReservedData) {
        self.available = self.available.saturating_sub(data.quantity);
        self.reservations.insert(data.reservation_id, data.quantity);
        self.reservation_order_ids
            .insert(data.reservation_id, data.order_id);
        if let Some(expires_at) = data.expires_at {
            self.reservation_expiries
                .insert(data.reservation_id, expires_at);
        }
    }

    fn apply_hold_returned(&mut self, data: ReservationData) {
        if let Some(quantity) = self.reservations.remove(&data.reservation_id) {
            self.available = self.available.saturating_add(quantity);
        }
        self.reservation_expiries.remove(&data.reservation_id);
        self.reservation_order_ids.remove(&data.reservation_id);
    }
}
