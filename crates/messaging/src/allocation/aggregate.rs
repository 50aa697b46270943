//! Order allocation process aggregate.

use std::collections::{BTreeMap, BTreeSet};

use common::AggregateId;
use domain::{Aggregate, CustomerId, OrderId, Sku};
use event_store::Version;
use serde::{Deserialize, Serialize};

use super::events::{AllocationEvent, AllocationLine};
use super::state::AllocationState;
use crate::error::MessagingError;

/// Event-sourced record of one `OrderPlaced` fan-out.
///
/// The stream id is derived from the order id, so every delivery of the
/// same order resumes the same process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAllocation {
    id: Option<AggregateId>,
    version: Version,
    order_id: Option<OrderId>,
    customer_id: Option<CustomerId>,
    state: AllocationState,
    lines: Vec<AllocationLine>,
    reserved: BTreeMap<Sku, u32>,
    /// SKU → rejection code.
    rejected: BTreeMap<Sku, String>,
    released: BTreeSet<Sku>,
    /// SKU → last release error.
    unreleased: BTreeMap<Sku, String>,
    failure_reason: Option<String>,
}

impl OrderAllocation {
    pub const AGGREGATE_TYPE: &'static str = "OrderAllocation";

    pub fn id_for(order_id: OrderId) -> AggregateId {
        AggregateId::from_natural_key(Self::AGGREGATE_TYPE, &order_id.to_string())
    }
}

impl Aggregate for OrderAllocation {
    type Event = AllocationEvent;
    type Error = MessagingError;

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
            AllocationEvent::AllocationStarted(data) => {
                self.id = Some(data.allocation_id);
                self.order_id = Some(data.order_id);
                self.customer_id = Some(data.customer_id);
                self.lines = data.lines;
                self.state = AllocationState::Reserving;
            }
            AllocationEvent::SkuReserved(data) => {
                self.reserved.insert(data.sku, data.quantity);
            }
            AllocationEvent::SkuRejected(data) => {
                self.rejected.insert(data.sku, data.reason);
            }
            AllocationEvent::CompensationStarted(_) => {
                self.state = AllocationState::Compensating;
            }
            AllocationEvent::SkuReleased(data) => {
                self.unreleased.remove(&data.sku);
                self.released.insert(data.sku);
            }
            AllocationEvent::CompensationStepFailed(data) => {
                self.unreleased.insert(data.sku, data.error);
            }
            AllocationEvent::AllocationCompleted(_) => {
                self.state = if self.rejected.is_empty() {
                    AllocationState::Allocated
                } else {
                    AllocationState::PartiallyAllocated
                };
            }
            AllocationEvent::AllocationFailed(data) => {
                self.state = AllocationState::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }
}

impl OrderAllocation {
    pub fn state(&self) -> AllocationState {
        self.state
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn lines(&self) -> &[AllocationLine] {
        &self.lines
    }

    pub fn line(&self, sku: &Sku) -> Option<&AllocationLine> {
        self.lines.iter().find(|line| &line.sku == sku)
    }

    /// Lines neither reserved nor rejected yet.
    pub fn pending_lines(&self) -> impl Iterator<Item = &AllocationLine> {
        self.lines.iter().filter(|line| !self.is_decided(&line.sku))
    }

    /// Reserved lines that compensation has not dealt with yet.
    pub fn lines_to_release(&self) -> impl Iterator<Item = &AllocationLine> {
        self.lines.iter().filter(|line| {
            self.reserved.contains_key(&line.sku)
                && !self.released.contains(&line.sku)
                && !self.unreleased.contains_key(&line.sku)
        })
    }

    pub fn is_decided(&self, sku: &Sku) -> bool {
        self.reserved.contains_key(sku) || self.rejected.contains_key(sku)
    }

    pub fn reserved(&self) -> &BTreeMap<Sku, u32> {
        &self.reserved
    }

    pub fn rejected(&self) -> &BTreeMap<Sku, String> {
        &self.rejected
    }

    pub fn released(&self) -> &BTreeSet<Sku> {
        &self.released
    }

    /// Lines compensation failed to release, with the error.
    pub fn unreleased(&self) -> &BTreeMap<Sku, String> {
        &self.unreleased
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}
