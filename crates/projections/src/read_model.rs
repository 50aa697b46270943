//! Query-side access shared by the inventory views.

/// A view answering queries about stock and reservations.
///
/// Counts are best effort: a view busy applying an event reports zero
/// rather than waiting for the write to finish.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entries currently held: locations for stock levels, reservation
    /// records for reservations.
    fn count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
