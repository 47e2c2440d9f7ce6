//! What happens when a publish meets a full buffer.

/// Structural size limit of the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// At most this many undelivered items are retained.
    Bounded(usize),
    /// No structural limit; the buffer doubles whenever it fills.
    Unbounded,
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::Bounded(crate::config::DEFAULT_CAPACITY)
    }
}

/// Strategy consulted exactly once per publish that finds the buffer full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Reject the publish and fail the dispatcher with an overflow error.
    #[default]
    Error,
    /// Discard the incoming item and report it to the drop hook.
    ///
    /// The discard only happens when no subscription has room. While some
    /// do, the oldest item is evicted for the ones that are full and they
    /// are told with `on_overflow`.
    DropLatest,
    /// Evict the oldest buffered item (reported to the drop hook) and store
    /// the incoming one.
    DropOldest,
    /// Discard the incoming item without telling anyone which one it was.
    /// Subscriptions with room are served the same way as under `DropLatest`.
    Drop,
    /// Grow the buffer; nothing is ever discarded for lack of room.
    Unbounded,
}

/// Concrete step the dispatcher takes for one overflowing publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Fail,
    DiscardIncoming { notify: bool },
    EvictOldest,
    Grow,
}

pub(crate) fn resolve(capacity: Capacity, policy: OverflowPolicy) -> Resolution {
    if capacity == Capacity::Unbounded {
        return Resolution::Grow;
    }
    match policy {
        OverflowPolicy::Error => Resolution::Fail,
        OverflowPolicy::DropLatest => Resolution::DiscardIncoming { notify: true },
        OverflowPolicy::Drop => Resolution::DiscardIncoming { notify: false },
        OverflowPolicy::DropOldest => Resolution::EvictOldest,
        OverflowPolicy::Unbounded => Resolution::Grow,
    }
}
