//! Audit trail of the Order-Placed fan-out.

mod aggregate;
mod events;
mod state;

pub use aggregate::OrderAllocation;
pub use events::{AllocationEvent, AllocationLine};
pub use state::AllocationState;
