//! History kept for subscribers that attach late.

use std::collections::VecDeque;
use std::sync::Arc;

/// How much history a [`ReplayLog`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Only the `n` most recently recorded items.
    KeepLast(usize),
    /// Everything. Bounding memory is the caller's problem.
    KeepAll,
}

/// Publish-ordered log of recorded items.
///
/// Eviction only ever removes from the front, so the relative order of
/// whatever remains never changes.
#[derive(Debug)]
pub struct ReplayLog<T> {
    items: VecDeque<Arc<T>>,
    retention: Retention,
}

impl<T> ReplayLog<T> {
    pub fn new(retention: Retention) -> Self {
        let items = match retention {
            Retention::KeepLast(n) => VecDeque::with_capacity(n),
            Retention::KeepAll => VecDeque::new(),
        };
        Self { items, retention }
    }

    /// Appends an item, evicting the oldest one if the log would exceed its
    /// retention.
    pub fn record(&mut self, item: Arc<T>) {
        if let Retention::KeepLast(n) = self.retention {
            if n == 0 {
                return;
            }
            while self.items.len() >= n {
                self.items.pop_front();
            }
        }
        self.items.push_back(item);
    }

    /// Returns the retained items, oldest first.
    pub fn snapshot(&self) -> VecDeque<Arc<T>> {
        self.items.clone()
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
