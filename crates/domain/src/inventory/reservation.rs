//! Reservation lifecycle.

use serde::{Deserialize, Serialize};

/// Where a single reservation is in its lifecycle.
///
/// ```text
/// Reserved ──┬──► Committed ──► Fulfilled
///            ├──► Released
///            └──► Expired
/// ```
///
/// Reserved is a soft hold; Committed is a hard allocation that can no
/// longer be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Reserved,
    Committed,
    Released,
    Expired,
    Fulfilled,
}

impl ReservationStatus {
    pub fn can_commit(&self) -> bool {
        matches!(self, ReservationStatus::Reserved)
    }

    pub fn can_release(&self) -> bool {
        matches!(self, ReservationStatus::Reserved)
    }

    pub fn can_fulfill(&self) -> bool {
        matches!(self, ReservationStatus::Committed)
    }

    /// True while the reservation still holds stock out of the available pool.
    pub fn holds_stock(&self) -> bool {
        matches!(self, ReservationStatus::Reserved | ReservationStatus::Committed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.holds_stock()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "Reserved",
            ReservationStatus::Committed => "Committed",
            ReservationStatus::Released => "Released",
            ReservationStatus::Expired => "Expired",
            ReservationStatus::Fulfilled => "Fulfilled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
