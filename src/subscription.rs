//! Per-consumer attachment state: read cursor, outstanding demand and the
//! replay backlog, plus the handle consumers use to steer it.

use crate::consumer::Consumer;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Demand value meaning "no limit".
const UNBOUNDED: u64 = u64::MAX;

/// Identifier of a subscription, unique within its dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Number of items a subscriber authorises itself to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Bounded(u64),
    Unbounded,
}

impl From<u64> for Demand {
    fn from(n: u64) -> Self {
        if n == UNBOUNDED {
            Demand::Unbounded
        } else {
            Demand::Bounded(n)
        }
    }
}

/// Dispatcher-side operations a handle forwards to.
pub(crate) trait Control<T, E>: Send + Sync {
    fn request(&self, subscription: &Subscription<T, E>, demand: Demand);
    fn cancel(&self, subscription: &Subscription<T, E>);
    fn pending(&self, subscription: &Subscription<T, E>) -> u64;
    /// Every producer handle is gone.
    fn abandon(&self);
}

/// State of one subscription.
///
/// `cursor` is only ever advanced by the thread currently draining the
/// subscription (the one that won `enter`); publishers read it to decide
/// what the slowest subscriber still needs.
pub(crate) struct Subscription<T, E> {
    pub(crate) id: SubscriptionId,
    pub(crate) consumer: Box<dyn Consumer<T, E>>,
    /// Sequence of the next live item to read from the ring
    cursor: AtomicU64,
    /// Outstanding demand, `UNBOUNDED` for no limit
    demand: AtomicU64,
    /// Drain requests not yet serviced; non-zero while someone is draining
    wip: AtomicUsize,
    /// Set once `on_subscribe` returned
    ready: AtomicBool,
    cancelled: AtomicBool,
    /// Set once the terminal signal was handed out
    finished: AtomicBool,
    /// Replayed history, delivered before any live item
    backlog: Mutex<VecDeque<Arc<T>>>,
    delivered: AtomicU64,
}

impl<T, E> Subscription<T, E> {
    pub(crate) fn new(
        id: SubscriptionId,
        consumer: Box<dyn Consumer<T, E>>,
        cursor: u64,
        backlog: VecDeque<Arc<T>>,
    ) -> Self {
        Self {
            id,
            consumer,
            cursor: AtomicU64::new(cursor),
            demand: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            backlog: Mutex::new(backlog),
            delivered: AtomicU64::new(0),
        }
    }

    pub(crate) fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub(crate) fn advance_to(&self, seq: u64) {
        self.cursor.store(seq, Ordering::Release);
    }

    /// Adds to the outstanding demand, saturating into unbounded.
    /// Returns false for a request of zero items.
    pub(crate) fn add_demand(&self, demand: Demand) -> bool {
        let n = match demand {
            Demand::Bounded(0) => return false,
            Demand::Bounded(n) => n,
            Demand::Unbounded => UNBOUNDED,
        };
        let mut current = self.demand.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return true;
            }
            let next = current.saturating_add(n);
            match self.demand.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Consumes one unit of demand if there is any.
    pub(crate) fn take_demand(&self) -> bool {
        let mut current = self.demand.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return true;
            }
            if current == 0 {
                return false;
            }
            match self.demand.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn outstanding_demand(&self) -> Demand {
        Demand::from(self.demand.load(Ordering::Acquire))
    }

    /// Registers a drain request. Returns true if the caller must drain.
    pub(crate) fn enter(&self) -> bool {
        self.wip.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Retires `serviced` drain requests and returns how many arrived in
    /// the meantime.
    pub(crate) fn leave(&self, serviced: usize) -> usize {
        self.wip.fetch_sub(serviced, Ordering::AcqRel) - serviced
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns true only for the call that actually cancelled.
    pub(crate) fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns true only for the call that actually finished.
    pub(crate) fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Cancelled or terminated: no further callbacks.
    pub(crate) fn is_closed(&self) -> bool {
        self.is_cancelled() || self.is_finished()
    }

    fn backlog(&self) -> MutexGuard<'_, VecDeque<Arc<T>>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn has_backlog(&self) -> bool {
        !self.backlog().is_empty()
    }

    pub(crate) fn pop_backlog(&self) -> Option<Arc<T>> {
        self.backlog().pop_front()
    }

    pub(crate) fn backlog_len(&self) -> u64 {
        self.backlog().len() as u64
    }

    pub(crate) fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Handle to one subscription.
///
/// Cheap to clone; every clone steers the same subscription. A handle keeps
/// the dispatch state alive, so items published before the last dispatcher
/// handle went away can still be requested, followed by the terminal signal.
/// It does not count as a producer.
pub struct SubscriptionHandle<T, E> {
    subscription: Arc<Subscription<T, E>>,
    control: Arc<dyn Control<T, E>>,
}

impl<T, E> SubscriptionHandle<T, E> {
    pub(crate) fn new(
        subscription: Arc<Subscription<T, E>>,
        control: Arc<dyn Control<T, E>>,
    ) -> Self {
        Self {
            subscription,
            control,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.subscription.id
    }

    /// Authorises `demand` more items and delivers whatever is already
    /// available up to the new demand, on the calling thread.
    pub fn request(&self, demand: impl Into<Demand>) {
        self.control.request(&self.subscription, demand.into());
    }

    /// Detaches the subscription. No callback is started afterwards.
    pub fn cancel(&self) {
        self.control.cancel(&self.subscription);
    }

    pub fn is_cancelled(&self) -> bool {
        self.subscription.is_cancelled()
    }

    /// True once the terminal signal was delivered.
    pub fn is_terminated(&self) -> bool {
        self.subscription.is_finished()
    }

    pub fn outstanding_demand(&self) -> Demand {
        self.subscription.outstanding_demand()
    }

    /// Items available to this subscriber but not yet delivered.
    pub fn pending(&self) -> u64 {
        self.control.pending(&self.subscription)
    }

    /// Items delivered so far.
    pub fn delivered(&self) -> u64 {
        self.subscription.delivered()
    }
}

impl<T, E> Clone for SubscriptionHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription.clone(),
            control: self.control.clone(),
        }
    }
}

impl<T, E> fmt::Debug for SubscriptionHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.subscription.id)
            .field("cancelled", &self.is_cancelled())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl<T, E> PartialEq for SubscriptionHandle<T, E> {
    fn eq(&self, other: &SubscriptionHandle<T, E>) -> bool {
        Arc::ptr_eq(&self.subscription, &other.subscription)
    }
}

impl<T, E> Eq for SubscriptionHandle<T, E> {}
