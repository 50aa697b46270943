//! Integration messaging of the inventory context.
//!
//! This crate provides:
//! - The inbound and outbound message contracts and their envelope
//! - MessagePublisher, the transport seam, with an in-memory bus
//! - MessageConsumer: inbox deduplication, bounded retry, dead letters
//! - The Order-Placed fan-out with compensation, audited as an
//!   OrderAllocation stream
//! - The expiry sweeper for soft holds

pub mod allocation;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod expiry;
pub mod fanout;
pub mod inbox;
pub mod messages;
pub mod warehouse;

pub use allocation::{AllocationEvent, AllocationLine, AllocationState, OrderAllocation};
pub use bus::{InMemoryMessageBus, MessagePublisher};
pub use config::MessagingConfig;
pub use consumer::{DeliveryOutcome, InventoryMessageHandler, MessageConsumer, MessageHandler};
pub use dead_letter::{DeadLetter, DeadLetterQueue, InMemoryDeadLetterQueue};
pub use error::{MessagingError, Result};
pub use expiry::ExpirySweeper;
pub use fanout::OrderPlacedHandler;
pub use inbox::{InMemoryInbox, Inbox};
pub use messages::{
    Envelope, InboundMessage, MessageId, OrderLine, OrderPlaced, OutboundMessage,
    ReservationChanged, ReservationConfirmed, ReservationFailed, ReservationRef,
};
pub use warehouse::{SingleWarehouseSelector, WarehouseSelector};
