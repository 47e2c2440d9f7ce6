use std::sync::Arc;

/// Trait required by implementers of syncing primitives.
///
/// A slot holds at most one shared item. The ring buffer only ever has a
/// single writer per slot at a time, but any number of subscribers may
/// `load` concurrently with that write.
pub trait SwapSlot<T> {
    /// Stores the item, dropping the previously held item's Arc.
    fn store(&self, item: Arc<T>);
    /// Returns a clone of the held Arc,
    /// incrementing the ref count atomically
    fn load(&self) -> Option<Arc<T>>;
    /// Empties the slot and hands back whatever it held.
    fn take(&self) -> Option<Arc<T>>;
    /// Creates a placeholder without an item.
    fn none() -> Self;
}
