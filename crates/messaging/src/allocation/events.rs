//! Events of the order allocation process.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{CustomerId, DomainEvent, OrderId, ReservationId, Sku, StockLocation, WarehouseId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AllocationEvent {
    AllocationStarted(AllocationStartedData),

    SkuReserved(SkuReservedData),

    /// The inventory refused a line.
    SkuRejected(SkuRejectedData),

    CompensationStarted(CompensationStartedData),

    /// A reserved line was released during compensation.
    SkuReleased(SkuReleasedData),

    /// A line could not be released; compensation carries on.
    CompensationStepFailed(CompensationStepFailedData),

    AllocationCompleted(AllocationCompletedData),

    AllocationFailed(AllocationFailedData),
}

impl DomainEvent for AllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationEvent::AllocationStarted(_) => "AllocationStarted",
            AllocationEvent::SkuReserved(_) => "SkuReserved",
            AllocationEvent::SkuRejected(_) => "SkuRejected",
            AllocationEvent::CompensationStarted(_) => "CompensationStarted",
            AllocationEvent::SkuReleased(_) => "SkuReleased",
            AllocationEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            AllocationEvent::AllocationCompleted(_) => "AllocationCompleted",
            AllocationEvent::AllocationFailed(_) => "AllocationFailed",
        }
    }
}

/// One distinct SKU of an order, with its summed quantity and the
/// warehouse chosen to serve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub sku: Sku,
    pub warehouse: WarehouseId,
    pub reservation_id: ReservationId,
    pub quantity: u32,
}

impl AllocationLine {
    pub fn location(&self) -> StockLocation {
        StockLocation::new(self.sku.clone(), self.warehouse.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationStartedData {
    pub allocation_id: AggregateId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<AllocationLine>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuReservedData {
    pub sku: Sku,
    pub reservation_id: ReservationId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuRejectedData {
    pub sku: Sku,
    /// Rejection code, e.g. `insufficient_stock`.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStartedData {
    pub rejected: Vec<Sku>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuReleasedData {
    pub sku: Sku,
    pub reservation_id: ReservationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStepFailedData {
    pub sku: Sku,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl AllocationEvent {
    pub fn allocation_started(
        allocation_id: AggregateId,
        order_id: OrderId,
        customer_id: CustomerId,
        lines: Vec<AllocationLine>,
    ) -> Self {
        AllocationEvent::AllocationStarted(AllocationStartedData {
            allocation_id,
            order_id,
            customer_id,
            lines,
            started_at: Utc::now(),
        })
    }

    pub fn sku_reserved(line: &AllocationLine) -> Self {
        AllocationEvent::SkuReserved(SkuReservedData {
            sku: line.sku.clone(),
            reservation_id: line.reservation_id,
            quantity: line.quantity,
        })
    }

    pub fn sku_rejected(sku: Sku, reason: impl Into<String>) -> Self {
        AllocationEvent::SkuRejected(SkuRejectedData {
            sku,
            reason: reason.into(),
        })
    }

    pub fn compensation_started(rejected: Vec<Sku>) -> Self {
        AllocationEvent::CompensationStarted(CompensationStartedData { rejected })
    }

    pub fn sku_released(sku: Sku, reservation_id: ReservationId) -> Self {
        AllocationEvent::SkuReleased(SkuReleasedData {
            sku,
            reservation_id,
        })
    }

    pub fn compensation_step_failed(sku: Sku, error: impl Into<String>) -> Self {
        AllocationEvent::CompensationStepFailed(CompensationStepFailedData {
            sku,
            error: error.into(),
        })
    }

    pub fn allocation_completed() -> Self {
        AllocationEvent::AllocationCompleted(AllocationCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn allocation_failed(reason: impl Into<String>) -> Self {
        AllocationEvent::AllocationFailed(AllocationFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
