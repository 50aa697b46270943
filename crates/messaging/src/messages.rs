//! Integration message contracts.
//!
//! Inbound messages come from the Ordering and Fulfillment contexts; outbound
//! messages report what the Inventory context did. Every message travels in
//! an [`Envelope`].

use chrono::{DateTime, Utc};
use common::CorrelationId;
use domain::{
    CustomerId, InventoryError, InventoryEvent, OrderId, ReservationId, Sku, StockLocation,
    WarehouseId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique id of one published message. Redeliveries keep the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport wrapper around a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub message_id: MessageId,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    pub payload: M,
}

impl<M> Envelope<M> {
    /// Wraps a message that starts a new causal chain.
    pub fn new(payload: M) -> Self {
        Self::correlated(payload, CorrelationId::new())
    }

    pub fn correlated(payload: M, correlation_id: CorrelationId) -> Self {
        Self {
            message_id: MessageId::new(),
            correlation_id,
            occurred_at: Utc::now(),
            attempt: 1,
            payload,
        }
    }

    /// Wraps a message caused by `cause`, in the same causal chain.
    pub fn caused_by<C>(payload: M, cause: &Envelope<C>) -> Self {
        Self::correlated(payload, cause.correlation_id)
    }

    /// The same message, delivered once more.
    pub fn redelivered(&self) -> Self
    where
        M: Clone,
    {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// One line of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: Sku,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
}

/// Addresses an existing reservation. The SKU and warehouse select the
/// inventory stream that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRef {
    pub reservation_id: ReservationId,
    pub sku: Sku,
    pub warehouse: WarehouseId,
}

impl ReservationRef {
    pub fn new(reservation_id: ReservationId, location: &StockLocation) -> Self {
        Self {
            reservation_id,
            sku: location.sku.clone(),
            warehouse: location.warehouse.clone(),
        }
    }

    pub fn location(&self) -> StockLocation {
        StockLocation::new(self.sku.clone(), self.warehouse.clone())
    }
}

/// Messages the Inventory context consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InboundMessage {
    OrderPlaced(OrderPlaced),
    ReservationCommitRequested(ReservationRef),
    ReservationReleaseRequested(ReservationRef),
    /// The Fulfillment context shipped a committed allocation.
    FulfillmentCompleted(ReservationRef),
}

impl InboundMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            InboundMessage::OrderPlaced(_) => "OrderPlaced",
            InboundMessage::ReservationCommitRequested(_) => "ReservationCommitRequested",
            InboundMessage::ReservationReleaseRequested(_) => "ReservationReleaseRequested",
            InboundMessage::FulfillmentCompleted(_) => "FulfillmentCompleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConfirmed {
    pub order_id: OrderId,
    pub reservation_id: ReservationId,
    pub sku: Sku,
    pub warehouse: WarehouseId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFailed {
    pub order_id: OrderId,
    pub sku: Sku,
    /// Machine-readable rejection code, e.g. `insufficient_stock`.
    pub reason: String,
    pub detail: String,
}

impl ReservationFailed {
    pub fn new(order_id: OrderId, sku: Sku, error: &InventoryError) -> Self {
        Self {
            order_id,
            sku,
            reason: error.code().to_string(),
            detail: error.to_string(),
        }
    }
}

/// Payload of the committed, released and expired notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationChanged {
    pub order_id: OrderId,
    pub reservation_id: ReservationId,
    pub quantity: u32,
}

/// Messages the Inventory context publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundMessage {
    ReservationConfirmed(ReservationConfirmed),
    ReservationFailed(ReservationFailed),
    ReservationCommitted(ReservationChanged),
    ReservationReleased(ReservationChanged),
    ReservationExpired(ReservationChanged),
}

impl OutboundMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            OutboundMessage::ReservationConfirmed(_) => "ReservationConfirmed",
            OutboundMessage::ReservationFailed(_) => "ReservationFailed",
            OutboundMessage::ReservationCommitted(_) => "ReservationCommitted",
            OutboundMessage::ReservationReleased(_) => "ReservationReleased",
            OutboundMessage::ReservationExpired(_) => "ReservationExpired",
        }
    }

    /// Notification for a reservation lifecycle event, if the event has one.
    ///
    /// `StockReserved` is not covered: its confirmation also needs the
    /// location, see [`OutboundMessage::confirmed`].
    pub fn from_inventory_event(event: &InventoryEvent) -> Option<Self> {
        let changed = |data: &domain::inventory::ReservationData| ReservationChanged {
            order_id: data.order_id,
            reservation_id: data.reservation_id,
            quantity: data.quantity,
        };

        match event {
            InventoryEvent::ReservationCommitted(data) => {
                Some(OutboundMessage::ReservationCommitted(changed(data)))
            }
            InventoryEvent::ReservationReleased(data) => {
                Some(OutboundMessage::ReservationReleased(changed(data)))
            }
            InventoryEvent::ReservationExpired(data) => {
                Some(OutboundMessage::ReservationExpired(changed(data)))
            }
            _ => None,
        }
    }

    pub fn confirmed(
        order_id: OrderId,
        reservation_id: ReservationId,
        location: &StockLocation,
        quantity: u32,
    ) -> Self {
        OutboundMessage::ReservationConfirmed(ReservationConfirmed {
            order_id,
            reservation_id,
            sku: location.sku.clone(),
            warehouse: location.warehouse.clone(),
            quantity,
        })
    }

    pub fn released(order_id: OrderId, reservation_id: ReservationId, quantity: u32) -> Self {
        OutboundMessage::ReservationReleased(ReservationChanged {
            order_id,
            reservation_id,
            quantity,
        })
    }

    pub fn failed(order_id: OrderId, sku: Sku, error: &InventoryError) -> Self {
        OutboundMessage::ReservationFailed(ReservationFailed::new(order_id, sku, error))
    }
}
