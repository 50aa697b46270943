//! Allocation state machine.

use serde::{Deserialize, Serialize};

/// Progress of one order's fan-out.
///
/// ```text
/// NotStarted ──► Reserving ──┬──► Allocated
///                            ├──► PartiallyAllocated   (compensation off)
///                            ├──► Failed               (nothing reserved)
///                            └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AllocationState {
    #[default]
    NotStarted,

    /// Lines are being reserved.
    Reserving,

    /// A line failed; the reserved lines are being released.
    Compensating,

    /// Every line is reserved.
    Allocated,

    /// Some lines failed and the others were kept.
    PartiallyAllocated,

    Failed,
}

impl AllocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AllocationState::Allocated
                | AllocationState::PartiallyAllocated
                | AllocationState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationState::NotStarted => "NotStarted",
            AllocationState::Reserving => "Reserving",
            AllocationState::Compensating => "Compensating",
            AllocationState::Allocated => "Allocated",
            AllocationState::PartiallyAllocated => "PartiallyAllocated",
            AllocationState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for AllocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
