//! Fan-out of published items to independent, demand-driven subscriptions.

use crate::config::{DispatcherConfig, EmissionMode};
use crate::consumer::Consumer;
use crate::error::{ConfigError, Failure, PublishError, SubscribeError};
use crate::overflow::{self, Resolution};
use crate::replay::ReplayLog;
use crate::ring_buffer::{Read, RingBuffer};
use crate::subscription::{Control, Demand, Subscription, SubscriptionHandle, SubscriptionId};
use crate::swap_slot::SwapSlot;
use arc_swap::ArcSwap;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

type DropHook<T> = Box<dyn Fn(Arc<T>) + Send + Sync>;

/// How a dispatcher ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination<E> {
    Completed,
    Failed(Failure<E>),
}

/// Point-in-time counters of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStats {
    /// Items accepted by `publish`.
    pub published: u64,
    /// Incoming items discarded by `DropLatest` or `Drop`.
    pub dropped: u64,
    /// Buffered items evicted to make room: by `DropOldest`, or on behalf
    /// of subscriptions that fell a whole buffer behind.
    pub evicted: u64,
    /// Items handed to consumers, summed over subscriptions.
    pub delivered: u64,
    /// Live subscriptions.
    pub subscribers: usize,
    /// Items currently held by the ring buffer.
    pub buffered: usize,
    /// Current slot count of the ring buffer.
    pub capacity: usize,
    pub terminated: bool,
}

/// State only touched while holding the writer lock.
struct Writer<T> {
    replay: Option<ReplayLog<T>>,
    next_id: u64,
}

struct Shared<T, E: Clone, S: SwapSlot<T>> {
    config: DispatcherConfig,
    ring: RingBuffer<T, S>,
    /// Copy-on-write set of attached subscriptions, in attach order
    subscribers: ArcSwap<Vec<Arc<Subscription<T, E>>>>,
    /// Serializes publishers, terminal transitions and attachment
    writer: Mutex<Writer<T>>,
    termination: OnceLock<Termination<E>>,
    drop_hook: Option<DropHook<T>>,
    published: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    delivered: AtomicU64,
}

/// Owned by every `Dispatcher` clone. Dropping the last one completes the
/// dispatcher; subscription handles keep the state alive but not this.
struct Producer<T, E> {
    control: Arc<dyn Control<T, E>>,
}

impl<T, E> Drop for Producer<T, E> {
    fn drop(&mut self) {
        self.control.abandon();
    }
}

/// Producer-side handle of a dispatch core.
///
/// Cloning is cheap and every clone publishes into the same buffer. When the
/// last clone is dropped the dispatcher completes, so attached subscriptions
/// always see a terminal signal. Their handles stay usable afterwards and
/// drain whatever was published before.
///
/// A consumer that owns a `Dispatcher` clone counts as a producer: the
/// dispatcher does not complete on drop until that subscription is cancelled
/// or terminated and its handles are gone.
pub struct Dispatcher<T, E: Clone, S: SwapSlot<T>> {
    shared: Arc<Shared<T, E, S>>,
    producer: Arc<Producer<T, E>>,
}

impl<T, E, S> Dispatcher<T, E, S>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: SwapSlot<T> + Send + Sync + 'static,
{
    /// Creates a dispatcher. Out-of-range values in `config` are clamped;
    /// use [`Dispatcher::try_new`] to reject them instead.
    pub fn new(config: DispatcherConfig) -> Self {
        Self::build(config, None)
    }

    pub fn try_new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Creates a dispatcher whose overflow policy reports discarded items to
    /// `hook`: the rejected item under `DropLatest`, the evicted one under
    /// `DropOldest`. `Drop` discards silently and never calls it.
    ///
    /// The hook runs on the publishing thread after the publish released
    /// its locks.
    pub fn with_drop_hook<F>(config: DispatcherConfig, hook: F) -> Self
    where
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        Self::build(config, Some(Box::new(hook)))
    }

    fn build(config: DispatcherConfig, drop_hook: Option<DropHook<T>>) -> Self {
        let writer = Writer {
            replay: config.emission_mode.replay_retention().map(ReplayLog::new),
            next_id: 0,
        };
        let shared = Arc::new(Shared {
            config,
            ring: RingBuffer::new(config.initial_slots()),
            subscribers: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(writer),
            termination: OnceLock::new(),
            drop_hook,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        });
        let control: Arc<dyn Control<T, E>> = shared.clone();
        Self {
            shared,
            producer: Arc::new(Producer { control }),
        }
    }

    /// Publishes an item to every current subscription (and to the replay
    /// log, if any), then delivers to whoever has demand on this thread.
    ///
    /// Fails with `Terminated` once the dispatcher completed or failed, and
    /// with `Overflow` when the buffer is full under the `Error` policy.
    pub fn publish(&self, item: T) -> Result<(), PublishError> {
        self.shared.publish(Arc::new(item))
    }

    /// Attaches a consumer.
    ///
    /// `on_subscribe` runs before this returns; demand requested from it is
    /// served right away. Under `Unicast` a second live subscription is
    /// rejected with `TooManySubscribers`.
    pub fn subscribe<C>(&self, consumer: C) -> Result<SubscriptionHandle<T, E>, SubscribeError>
    where
        C: Consumer<T, E>,
    {
        let subscription = self.shared.attach(Box::new(consumer))?;
        let handle = SubscriptionHandle::new(subscription.clone(), self.producer.control.clone());
        tracing::debug!(subscription = %subscription.id, "subscribed");

        self.shared
            .guarded(&subscription, |consumer| consumer.on_subscribe(&handle));
        subscription.mark_ready();
        self.shared.drain(&subscription);
        Ok(handle)
    }

    /// Same as [`SubscriptionHandle::request`].
    pub fn request(&self, handle: &SubscriptionHandle<T, E>, demand: impl Into<Demand>) {
        handle.request(demand)
    }

    /// Same as [`SubscriptionHandle::cancel`].
    pub fn cancel(&self, handle: &SubscriptionHandle<T, E>) {
        handle.cancel()
    }

    /// Completes the dispatcher. Subscriptions receive `on_complete` after
    /// everything published before this call.
    pub fn complete(&self) -> Result<(), PublishError> {
        self.shared.terminate(Termination::Completed)
    }

    /// Fails the dispatcher with `error`. Subscriptions receive `on_error`
    /// after everything published before this call.
    pub fn fail(&self, error: E) -> Result<(), PublishError> {
        self.shared
            .terminate(Termination::Failed(Failure::Error(error)))
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.termination.get().is_some()
    }

    pub fn termination(&self) -> Option<Termination<E>> {
        self.shared.termination.get().cloned()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Items currently held by the ring buffer, oldest first.
    pub fn buffered(&self) -> Vec<Arc<T>> {
        self.shared.ring.snapshot()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.live_subscribers()
    }

    pub fn stats(&self) -> DispatcherStats {
        let shared = &self.shared;
        DispatcherStats {
            published: shared.published.load(Ordering::Relaxed),
            dropped: shared.dropped.load(Ordering::Relaxed),
            evicted: shared.evicted.load(Ordering::Relaxed),
            delivered: shared.delivered.load(Ordering::Relaxed),
            subscribers: shared.live_subscribers(),
            buffered: shared.ring.len(),
            capacity: shared.ring.capacity(),
            terminated: shared.termination.get().is_some(),
        }
    }
}

impl<T, E: Clone, S: SwapSlot<T>> Clone for Dispatcher<T, E, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            producer: self.producer.clone(),
        }
    }
}

impl<T, E: Clone, S: SwapSlot<T>> PartialEq for Dispatcher<T, E, S> {
    fn eq(&self, other: &Dispatcher<T, E, S>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T, E: Clone, S: SwapSlot<T>> Eq for Dispatcher<T, E, S> {}

impl<T, E: Clone + fmt::Debug, S: SwapSlot<T>> fmt::Debug for Dispatcher<T, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.shared.config)
            .field("ring", &self.shared.ring)
            .field("termination", &self.shared.termination.get())
            .finish()
    }
}

impl<T, E, S> Shared<T, E, S>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: SwapSlot<T> + Send + Sync + 'static,
{
    fn publish(&self, item: Arc<T>) -> Result<(), PublishError> {
        let mut discarded = None;
        {
            let mut writer = self.writer();
            if self.termination.get().is_some() {
                return Err(PublishError::Terminated);
            }
            self.reclaim();

            let retain = self.config.emission_mode == EmissionMode::Unicast
                || self.live_subscribers() > 0;
            if retain {
                if let Err(rejected) = self.ring.store(item.clone()) {
                    match overflow::resolve(self.config.capacity, self.config.overflow_policy) {
                        Resolution::Fail => {
                            let _ = self
                                .termination
                                .set(Termination::Failed(Failure::Overflow));
                            drop(writer);
                            tracing::warn!(
                                capacity = self.ring.capacity(),
                                "buffer overflow, dispatcher failed"
                            );
                            self.dispatch();
                            return Err(PublishError::Overflow);
                        }
                        Resolution::DiscardIncoming { .. } if self.someone_has_room() => {
                            // Only the subscriptions pinning the head are full:
                            // they lose their oldest item, the others keep flowing.
                            self.ring.evict_oldest();
                            self.evicted.fetch_add(1, Ordering::Relaxed);
                            tracing::trace!("lagging subscribers overrun, oldest item evicted");
                            self.store_after_resolution(rejected);
                        }
                        Resolution::DiscardIncoming { notify } => {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            tracing::trace!(notify, "buffer full, incoming item discarded");
                            if notify {
                                discarded = Some(rejected);
                            }
                            return self.after_discard(writer, discarded);
                        }
                        Resolution::EvictOldest => {
                            discarded = self.ring.evict_oldest();
                            self.evicted.fetch_add(1, Ordering::Relaxed);
                            tracing::trace!("buffer full, oldest item evicted");
                            self.store_after_resolution(rejected);
                        }
                        Resolution::Grow => {
                            self.ring.grow();
                            self.store_after_resolution(rejected);
                        }
                    }
                }
            }
            if let Some(replay) = writer.replay.as_mut() {
                replay.record(item);
            }
            self.published.fetch_add(1, Ordering::Relaxed);
        }

        self.notify_dropped(discarded);
        self.dispatch();
        Ok(())
    }

    /// Stores an item into the slot the overflow resolution just freed.
    fn store_after_resolution(&self, item: Arc<T>) {
        let stored = self.ring.store(item);
        debug_assert!(stored.is_ok(), "overflow resolution left no room");
    }

    fn after_discard(
        &self,
        writer: MutexGuard<'_, Writer<T>>,
        discarded: Option<Arc<T>>,
    ) -> Result<(), PublishError> {
        drop(writer);
        self.notify_dropped(discarded);
        Ok(())
    }

    fn notify_dropped(&self, discarded: Option<Arc<T>>) {
        if let (Some(hook), Some(item)) = (self.drop_hook.as_ref(), discarded) {
            hook(item);
        }
    }

    /// Registers a new subscription positioned according to the emission
    /// mode. Runs under the writer lock so no publish slips in between the
    /// start position and the subscriber set.
    fn attach(
        &self,
        consumer: Box<dyn Consumer<T, E>>,
    ) -> Result<Arc<Subscription<T, E>>, SubscribeError> {
        let mut writer = self.writer();
        let (cursor, backlog) = match self.config.emission_mode {
            EmissionMode::Unicast => {
                if self.live_subscribers() > 0 {
                    return Err(SubscribeError::TooManySubscribers);
                }
                (self.ring.head(), VecDeque::new())
            }
            EmissionMode::Multicast => (self.ring.tail(), VecDeque::new()),
            EmissionMode::MulticastReplay(_) => {
                let backlog = writer
                    .replay
                    .as_ref()
                    .map(ReplayLog::snapshot)
                    .unwrap_or_default();
                (self.ring.tail(), backlog)
            }
        };
        let id = SubscriptionId(writer.next_id);
        writer.next_id += 1;

        let subscription = Arc::new(Subscription::new(id, consumer, cursor, backlog));
        self.subscribers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(subscription.clone());
            next
        });
        Ok(subscription)
    }

    fn terminate(&self, termination: Termination<E>) -> Result<(), PublishError> {
        {
            let _writer = self.writer();
            self.termination
                .set(termination)
                .map_err(|_| PublishError::Terminated)?;
        }
        tracing::debug!(
            failed = matches!(self.termination.get(), Some(Termination::Failed(_))),
            "dispatcher terminated"
        );
        self.dispatch();
        Ok(())
    }

    fn writer(&self) -> MutexGuard<'_, Writer<T>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_subscribers(&self) -> usize {
        self.subscribers
            .load()
            .iter()
            .filter(|subscription| !subscription.is_closed())
            .count()
    }

    /// True if some live subscription has read past the oldest buffered
    /// item and so still has room for the next one.
    fn someone_has_room(&self) -> bool {
        let head = self.ring.head();
        self.subscribers
            .load()
            .iter()
            .any(|subscription| !subscription.is_closed() && subscription.cursor() > head)
    }

    /// Releases every item all live subscriptions have moved past.
    /// Must be called with the writer lock held.
    fn reclaim(&self) {
        let subscribers = self.subscribers.load();
        let slowest = subscribers
            .iter()
            .filter(|subscription| !subscription.is_closed())
            .map(|subscription| subscription.cursor())
            .min();
        match slowest {
            Some(cursor) => {
                self.ring.release_to(cursor);
            }
            // A future unicast subscriber still gets what is buffered.
            None if self.config.emission_mode == EmissionMode::Unicast => {}
            None => {
                self.ring.release_to(self.ring.tail());
            }
        }
    }

    /// Gives every attached subscription a chance to drain.
    fn dispatch(&self) {
        let subscribers = self.subscribers.load_full();
        for subscription in subscribers.iter() {
            self.drain(subscription);
        }
    }

    /// Serializes delivery to one subscription: whoever enters first drains
    /// on behalf of everyone who asked in the meantime, including reentrant
    /// calls made from inside a callback.
    fn drain(&self, subscription: &Subscription<T, E>) {
        if !subscription.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            self.drain_pass(subscription);
            missed = subscription.leave(missed);
            if missed == 0 {
                break;
            }
        }
        if subscription.is_closed() {
            self.remove(subscription);
        }
    }

    fn drain_pass(&self, subscription: &Subscription<T, E>) {
        if !subscription.is_ready() {
            return;
        }
        loop {
            if subscription.is_closed() {
                return;
            }
            // Loaded before reading the ring: once set, nothing more is stored.
            let termination = self.termination.get();

            if subscription.has_backlog() {
                if !subscription.take_demand() {
                    return;
                }
                if let Some(item) = subscription.pop_backlog() {
                    self.deliver(subscription, item);
                }
                continue;
            }

            let cursor = subscription.cursor();
            match self.ring.read(cursor) {
                Read::Item(item) => {
                    if !subscription.take_demand() {
                        return;
                    }
                    subscription.advance_to(cursor + 1);
                    self.deliver(subscription, item);
                }
                Read::Evicted { oldest } => {
                    subscription.advance_to(oldest);
                    let skipped = oldest - cursor;
                    tracing::trace!(subscription = %subscription.id, skipped, "subscriber overrun");
                    self.guarded(subscription, |consumer| consumer.on_overflow(skipped));
                }
                Read::NotYetAvailable => {
                    match termination {
                        Some(termination) if cursor >= self.ring.tail() => {
                            self.finish(subscription, termination)
                        }
                        _ => {}
                    }
                    return;
                }
            }
        }
    }

    fn deliver(&self, subscription: &Subscription<T, E>, item: Arc<T>) {
        if self.guarded(subscription, |consumer| consumer.on_item(item)) {
            subscription.record_delivery();
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn finish(&self, subscription: &Subscription<T, E>, termination: &Termination<E>) {
        if !subscription.finish() {
            return;
        }
        match termination {
            Termination::Completed => {
                self.guarded(subscription, |consumer| consumer.on_complete());
            }
            Termination::Failed(failure) => {
                let failure = failure.clone();
                self.guarded(subscription, |consumer| consumer.on_error(failure));
            }
        }
    }

    /// Runs a consumer callback, cancelling the subscription if it panics.
    fn guarded<F>(&self, subscription: &Subscription<T, E>, callback: F) -> bool
    where
        F: FnOnce(&dyn Consumer<T, E>),
    {
        // A concurrent cancel may land after the drain loop last looked.
        if subscription.is_cancelled() {
            return false;
        }
        let consumer = subscription.consumer.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| callback(consumer))) {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(
                    subscription = %subscription.id,
                    "consumer callback panicked, cancelling subscription"
                );
                subscription.cancel();
                false
            }
        }
    }

    fn remove(&self, subscription: &Subscription<T, E>) {
        let target: *const Subscription<T, E> = subscription;
        self.subscribers.rcu(|current| {
            current
                .iter()
                .filter(|attached| !std::ptr::eq(Arc::as_ptr(attached), target))
                .cloned()
                .collect::<Vec<_>>()
        });
        if self.config.emission_mode == EmissionMode::Unicast {
            // Whatever the departed subscriber consumed is not handed to the next one.
            let _writer = self.writer();
            self.ring.release_to(subscription.cursor());
        }
    }

    fn pending_for(&self, subscription: &Subscription<T, E>) -> u64 {
        if subscription.is_closed() {
            return 0;
        }
        let live = self
            .ring
            .tail()
            .saturating_sub(subscription.cursor().max(self.ring.head()));
        subscription.backlog_len() + live
    }
}

impl<T, E, S> Control<T, E> for Shared<T, E, S>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: SwapSlot<T> + Send + Sync + 'static,
{
    fn request(&self, subscription: &Subscription<T, E>, demand: Demand) {
        if !subscription.add_demand(demand) {
            tracing::warn!(subscription = %subscription.id, "ignoring request for zero items");
            return;
        }
        self.drain(subscription);
    }

    fn cancel(&self, subscription: &Subscription<T, E>) {
        if subscription.cancel() {
            tracing::debug!(subscription = %subscription.id, "subscription cancelled");
            // Whoever is draining removes it once the pass notices.
            self.drain(subscription);
        }
    }

    fn pending(&self, subscription: &Subscription<T, E>) -> u64 {
        self.pending_for(subscription)
    }

    fn abandon(&self) {
        if self.terminate(Termination::Completed).is_ok() {
            tracing::debug!("last dispatcher handle dropped, completed");
        }
    }
}

#[cfg(all(test, feature = "arcswap"))]
mod test {
    use super::*;
    use crate::config::{Capacity, OverflowPolicy, Retention};
    use crate::flavors::arc_swap::Slot;

    type TestDispatcher = Dispatcher<u32, &'static str, Slot<u32>>;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Signal {
        Item(u32),
        Overflow(u64),
        Complete,
        Error(Failure<&'static str>),
    }

    struct Recorder {
        signals: Arc<Mutex<Vec<Signal>>>,
        initial: Option<Demand>,
    }

    impl Recorder {
        fn new(initial: Option<Demand>) -> (Self, Arc<Mutex<Vec<Signal>>>) {
            let signals = Arc::new(Mutex::new(Vec::new()));
            (
                Recorder {
                    signals: signals.clone(),
                    initial,
                },
                signals,
            )
        }
    }

    impl Consumer<u32, &'static str> for Recorder {
        fn on_subscribe(&self, subscription: &SubscriptionHandle<u32, &'static str>) {
            if let Some(demand) = self.initial {
                subscription.request(demand);
            }
        }

        fn on_item(&self, item: Arc<u32>) {
            self.signals.lock().unwrap().push(Signal::Item(*item));
        }

        fn on_overflow(&self, skipped: u64) {
            self.signals.lock().unwrap().push(Signal::Overflow(skipped));
        }

        fn on_complete(&self) {
            self.signals.lock().unwrap().push(Signal::Complete);
        }

        fn on_error(&self, error: Failure<&'static str>) {
            self.signals.lock().unwrap().push(Signal::Error(error));
        }
    }

    fn items(signals: &Arc<Mutex<Vec<Signal>>>) -> Vec<Signal> {
        signals.lock().unwrap().clone()
    }

    fn bounded(capacity: usize, policy: OverflowPolicy, mode: EmissionMode) -> TestDispatcher {
        Dispatcher::new(
            DispatcherConfig::builder()
                .capacity(Capacity::Bounded(capacity))
                .overflow_policy(policy)
                .emission_mode(mode)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn multicast_subscriber_starts_at_write_cursor() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Multicast);
        dispatcher.publish(1).unwrap();

        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(recorder).unwrap();
        dispatcher.publish(2).unwrap();

        assert_eq!(items(&signals), vec![Signal::Item(2)]);
    }

    #[test]
    fn bounded_demand_limits_delivery() {
        let dispatcher = bounded(8, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(Some(Demand::Bounded(2)));
        let handle = dispatcher.subscribe(recorder).unwrap();

        for i in 0..5 {
            dispatcher.publish(i).unwrap();
        }
        assert_eq!(items(&signals), vec![Signal::Item(0), Signal::Item(1)]);
        assert_eq!(handle.pending(), 3);
        assert_eq!(handle.outstanding_demand(), Demand::Bounded(0));

        handle.request(2u64);
        assert_eq!(items(&signals).len(), 4);
        assert_eq!(handle.pending(), 1);
        assert_eq!(handle.delivered(), 4);
    }

    #[test]
    fn request_zero_is_ignored() {
        let dispatcher = bounded(8, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(None);
        let handle = dispatcher.subscribe(recorder).unwrap();
        dispatcher.publish(1).unwrap();

        handle.request(0u64);
        assert!(items(&signals).is_empty());
    }

    #[test]
    fn error_policy_fails_after_backlog() {
        let dispatcher = bounded(2, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(None);
        let handle = dispatcher.subscribe(recorder).unwrap();

        dispatcher.publish(0).unwrap();
        dispatcher.publish(1).unwrap();
        assert_eq!(dispatcher.publish(2), Err(PublishError::Overflow));
        assert_eq!(dispatcher.publish(3), Err(PublishError::Terminated));
        assert_eq!(
            dispatcher.termination(),
            Some(Termination::Failed(Failure::Overflow))
        );
        // Nothing delivered yet: the terminal signal waits behind the backlog.
        assert!(items(&signals).is_empty());

        handle.request(Demand::Unbounded);
        assert_eq!(
            items(&signals),
            vec![
                Signal::Item(0),
                Signal::Item(1),
                Signal::Error(Failure::Overflow)
            ]
        );
        assert!(handle.is_terminated());
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn drop_oldest_keeps_last_items() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let hook = dropped.clone();
        let config = DispatcherConfig::builder()
            .capacity(Capacity::Bounded(3))
            .overflow_policy(OverflowPolicy::DropOldest)
            .emission_mode(EmissionMode::Unicast)
            .build()
            .unwrap();
        let dispatcher: TestDispatcher =
            Dispatcher::with_drop_hook(config, move |item: Arc<u32>| {
                hook.lock().unwrap().push(*item)
            });

        for i in 0..5 {
            dispatcher.publish(i).unwrap();
        }
        let buffered: Vec<u32> = dispatcher.buffered().iter().map(|v| **v).collect();
        assert_eq!(buffered, vec![2, 3, 4]);
        assert_eq!(*dropped.lock().unwrap(), vec![0, 1]);
        assert_eq!(dispatcher.stats().evicted, 2);
        assert_eq!(dispatcher.stats().published, 5);
    }

    #[test]
    fn drop_latest_keeps_first_items() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let hook = dropped.clone();
        let config = DispatcherConfig::builder()
            .capacity(Capacity::Bounded(3))
            .overflow_policy(OverflowPolicy::DropLatest)
            .emission_mode(EmissionMode::Unicast)
            .build()
            .unwrap();
        let dispatcher: TestDispatcher =
            Dispatcher::with_drop_hook(config, move |item: Arc<u32>| {
                hook.lock().unwrap().push(*item)
            });

        for i in 0..5 {
            assert_eq!(dispatcher.publish(i), Ok(()));
        }
        let buffered: Vec<u32> = dispatcher.buffered().iter().map(|v| **v).collect();
        assert_eq!(buffered, vec![0, 1, 2]);
        assert_eq!(*dropped.lock().unwrap(), vec![3, 4]);
        assert_eq!(dispatcher.stats().dropped, 2);
    }

    #[test]
    fn drop_discards_silently() {
        let calls = Arc::new(AtomicU64::new(0));
        let hook = calls.clone();
        let config = DispatcherConfig::builder()
            .capacity(Capacity::Bounded(2))
            .overflow_policy(OverflowPolicy::Drop)
            .emission_mode(EmissionMode::Unicast)
            .build()
            .unwrap();
        let dispatcher: TestDispatcher = Dispatcher::with_drop_hook(config, move |_| {
            hook.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..4 {
            dispatcher.publish(i).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.stats().dropped, 2);
        assert_eq!(dispatcher.buffered().len(), 2);
    }

    #[test]
    fn lagging_subscriber_is_told_what_it_missed() {
        let dispatcher = bounded(2, OverflowPolicy::DropOldest, EmissionMode::Multicast);
        let (fast, fast_signals) = Recorder::new(Some(Demand::Unbounded));
        let (slow, slow_signals) = Recorder::new(None);
        dispatcher.subscribe(fast).unwrap();
        let slow = dispatcher.subscribe(slow).unwrap();

        for i in 0..4 {
            dispatcher.publish(i).unwrap();
        }
        assert_eq!(items(&fast_signals).len(), 4);

        slow.request(Demand::Unbounded);
        assert_eq!(
            items(&slow_signals),
            vec![
                Signal::Overflow(1),
                Signal::Overflow(1),
                Signal::Item(2),
                Signal::Item(3)
            ]
        );
    }

    #[test]
    fn unbounded_capacity_grows() {
        let dispatcher: TestDispatcher = Dispatcher::new(
            DispatcherConfig::builder()
                .capacity(Capacity::Unbounded)
                .build()
                .unwrap(),
        );
        let (recorder, signals) = Recorder::new(None);
        let handle = dispatcher.subscribe(recorder).unwrap();

        for i in 0..100 {
            dispatcher.publish(i).unwrap();
        }
        assert!(dispatcher.stats().capacity >= 100);

        handle.request(Demand::Unbounded);
        let expected: Vec<Signal> = (0..100).map(Signal::Item).collect();
        assert_eq!(items(&signals), expected);
    }

    #[test]
    fn replay_seeds_late_subscribers() {
        let dispatcher: TestDispatcher =
            Dispatcher::new(DispatcherConfig::replay(Retention::KeepLast(2)));
        for i in 1..=4 {
            dispatcher.publish(i).unwrap();
        }

        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(recorder).unwrap();
        dispatcher.publish(5).unwrap();

        assert_eq!(
            items(&signals),
            vec![Signal::Item(3), Signal::Item(4), Signal::Item(5)]
        );
    }

    #[test]
    fn replay_backlog_respects_demand() {
        let dispatcher: TestDispatcher =
            Dispatcher::new(DispatcherConfig::replay(Retention::KeepAll));
        for i in 0..3 {
            dispatcher.publish(i).unwrap();
        }

        let (recorder, signals) = Recorder::new(Some(Demand::Bounded(1)));
        let handle = dispatcher.subscribe(recorder).unwrap();
        dispatcher.publish(3).unwrap();
        assert_eq!(items(&signals), vec![Signal::Item(0)]);
        assert_eq!(handle.pending(), 3);

        handle.request(Demand::Unbounded);
        let expected: Vec<Signal> = (0..4).map(Signal::Item).collect();
        assert_eq!(items(&signals), expected);
    }

    #[test]
    fn unicast_allows_one_live_subscriber() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Unicast);
        let (first, _) = Recorder::new(None);
        let first = dispatcher.subscribe(first).unwrap();

        let (second, _) = Recorder::new(None);
        assert_eq!(
            dispatcher.subscribe(second).unwrap_err(),
            SubscribeError::TooManySubscribers
        );

        dispatcher.cancel(&first);
        let (third, _) = Recorder::new(None);
        assert!(dispatcher.subscribe(third).is_ok());
    }

    #[test]
    fn unicast_buffers_until_first_subscriber() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Unicast);
        dispatcher.publish(1).unwrap();
        dispatcher.publish(2).unwrap();

        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(recorder).unwrap();
        assert_eq!(items(&signals), vec![Signal::Item(1), Signal::Item(2)]);
    }

    #[test]
    fn cancel_stops_delivery() {
        let dispatcher = bounded(4, OverflowPolicy::DropLatest, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        let handle = dispatcher.subscribe(recorder).unwrap();
        dispatcher.publish(1).unwrap();

        handle.cancel();
        assert!(handle.is_cancelled());
        dispatcher.publish(2).unwrap();
        dispatcher.complete().unwrap();

        assert_eq!(items(&signals), vec![Signal::Item(1)]);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn complete_follows_items_and_only_once() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(recorder).unwrap();

        dispatcher.publish(1).unwrap();
        dispatcher.complete().unwrap();
        assert_eq!(dispatcher.complete(), Err(PublishError::Terminated));
        assert_eq!(dispatcher.fail("late"), Err(PublishError::Terminated));

        assert_eq!(items(&signals), vec![Signal::Item(1), Signal::Complete]);
    }

    #[test]
    fn fail_carries_the_error() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(recorder).unwrap();

        dispatcher.fail("boom").unwrap();
        assert_eq!(
            items(&signals),
            vec![Signal::Error(Failure::Error("boom"))]
        );
    }

    #[test]
    fn late_subscriber_sees_terminal_signal() {
        let dispatcher: TestDispatcher =
            Dispatcher::new(DispatcherConfig::replay(Retention::KeepAll));
        dispatcher.publish(7).unwrap();
        dispatcher.complete().unwrap();

        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        let handle = dispatcher.subscribe(recorder).unwrap();
        assert_eq!(items(&signals), vec![Signal::Item(7), Signal::Complete]);
        assert!(handle.is_terminated());
    }

    #[test]
    fn dropping_last_handle_completes() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        let handle = dispatcher.subscribe(recorder).unwrap();
        let clone = dispatcher.clone();

        dispatcher.publish(1).unwrap();
        drop(dispatcher);
        assert_eq!(items(&signals), vec![Signal::Item(1)]);
        drop(clone);

        assert_eq!(items(&signals), vec![Signal::Item(1), Signal::Complete]);
        assert!(handle.is_terminated());
        handle.request(1u64);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn handle_drains_after_the_last_dispatcher_is_dropped() {
        let dispatcher = bounded(8, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(Some(Demand::Bounded(1)));
        let handle = dispatcher.subscribe(recorder).unwrap();
        for i in 0..3 {
            dispatcher.publish(i).unwrap();
        }
        drop(dispatcher);

        // Completion waits behind the two undelivered items.
        assert_eq!(items(&signals), vec![Signal::Item(0)]);
        assert_eq!(handle.pending(), 2);
        assert!(!handle.is_terminated());

        handle.request(Demand::Unbounded);
        assert_eq!(
            items(&signals),
            vec![
                Signal::Item(0),
                Signal::Item(1),
                Signal::Item(2),
                Signal::Complete
            ]
        );
        assert!(handle.is_terminated());
    }

    #[test]
    fn consumer_owning_a_dispatcher_holds_completion_until_cancelled() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Multicast);
        let (watcher, signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(watcher).unwrap();
        let inner = dispatcher.clone();
        let echo = dispatcher
            .subscribe(crate::consumer::from_fn(move |item: Arc<u32>| {
                if *item == 0 {
                    let _ = inner.publish(100);
                }
            }))
            .unwrap();
        echo.request(Demand::Unbounded);

        dispatcher.publish(0).unwrap();
        drop(dispatcher);
        assert_eq!(items(&signals), vec![Signal::Item(0), Signal::Item(100)]);

        echo.cancel();
        drop(echo);
        assert_eq!(
            items(&signals),
            vec![Signal::Item(0), Signal::Item(100), Signal::Complete]
        );
    }

    #[test]
    fn no_callback_once_cancelled_mid_pass() {
        let dispatcher = bounded(4, OverflowPolicy::DropOldest, EmissionMode::Multicast);
        let (recorder, signals) = Recorder::new(None);
        dispatcher.subscribe(recorder).unwrap();
        let subscription = dispatcher.shared.subscribers.load()[0].clone();

        // Another thread cancels after the drain loop last checked.
        subscription.cancel();
        let ran = dispatcher
            .shared
            .guarded(&subscription, |consumer| consumer.on_overflow(1));
        assert!(!ran);
        assert!(items(&signals).is_empty());
    }

    #[test]
    fn drop_latest_evicts_for_laggards_while_others_have_room() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let hook = dropped.clone();
        let config = DispatcherConfig::builder()
            .capacity(Capacity::Bounded(2))
            .overflow_policy(OverflowPolicy::DropLatest)
            .build()
            .unwrap();
        let dispatcher: TestDispatcher =
            Dispatcher::with_drop_hook(config, move |item: Arc<u32>| {
                hook.lock().unwrap().push(*item)
            });
        let (stalled, stalled_signals) = Recorder::new(None);
        dispatcher.subscribe(stalled).unwrap();

        // Nobody can take item 2, so it is the one dropped.
        for i in 0..3 {
            dispatcher.publish(i).unwrap();
        }
        assert_eq!(*dropped.lock().unwrap(), vec![2]);

        let (eager, eager_signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(eager).unwrap();
        dispatcher.publish(3).unwrap();

        assert_eq!(items(&eager_signals), vec![Signal::Item(3)]);
        assert_eq!(items(&stalled_signals), vec![Signal::Overflow(1)]);
        assert_eq!(*dropped.lock().unwrap(), vec![2]);
        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.evicted, 1);
    }

    #[test]
    fn panicking_consumer_is_cancelled() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Multicast);
        let panicking = dispatcher
            .subscribe(crate::consumer::from_fn(|item: Arc<u32>| {
                if *item == 1 {
                    panic!("consumer bug");
                }
            }))
            .unwrap();
        panicking.request(Demand::Unbounded);
        let (recorder, signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(recorder).unwrap();

        for i in 0..3 {
            dispatcher.publish(i).unwrap();
        }
        assert!(panicking.is_cancelled());
        assert_eq!(dispatcher.subscriber_count(), 1);
        assert_eq!(
            items(&signals),
            vec![Signal::Item(0), Signal::Item(1), Signal::Item(2)]
        );
    }

    #[test]
    fn request_from_inside_on_item() {
        struct OneByOne {
            handle: OnceLock<SubscriptionHandle<u32, &'static str>>,
            seen: Arc<Mutex<Vec<u32>>>,
        }

        impl Consumer<u32, &'static str> for OneByOne {
            fn on_subscribe(&self, subscription: &SubscriptionHandle<u32, &'static str>) {
                let _ = self.handle.set(subscription.clone());
                subscription.request(1u64);
            }

            fn on_item(&self, item: Arc<u32>) {
                self.seen.lock().unwrap().push(*item);
                if let Some(handle) = self.handle.get() {
                    handle.request(1u64);
                }
            }
        }

        let dispatcher: TestDispatcher = Dispatcher::new(DispatcherConfig::unicast());
        for i in 0..3 {
            dispatcher.publish(i).unwrap();
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = dispatcher
            .subscribe(OneByOne {
                handle: OnceLock::new(),
                seen: seen.clone(),
            })
            .unwrap();
        dispatcher.publish(3).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(handle.outstanding_demand(), Demand::Bounded(1));
    }

    #[test]
    fn publish_from_inside_on_item_keeps_order() {
        let dispatcher = bounded(16, OverflowPolicy::Error, EmissionMode::Multicast);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (inner, sink) = (dispatcher.clone(), seen.clone());
        let handle = dispatcher
            .subscribe(crate::consumer::from_fn(move |item: Arc<u32>| {
                sink.lock().unwrap().push(*item);
                if *item < 3 {
                    inner.publish(*item + 10).unwrap();
                }
            }))
            .unwrap();
        handle.request(Demand::Unbounded);

        dispatcher.publish(0).unwrap();
        dispatcher.publish(1).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 10, 1, 11]);
    }

    #[test]
    fn unicast_resubscriber_skips_consumed_items() {
        let dispatcher = bounded(8, OverflowPolicy::Error, EmissionMode::Unicast);
        let (first, first_signals) = Recorder::new(Some(Demand::Bounded(2)));
        let first = dispatcher.subscribe(first).unwrap();
        for i in 0..4 {
            dispatcher.publish(i).unwrap();
        }
        assert_eq!(items(&first_signals).len(), 2);
        first.cancel();

        let (second, second_signals) = Recorder::new(Some(Demand::Unbounded));
        dispatcher.subscribe(second).unwrap();
        assert_eq!(
            items(&second_signals),
            vec![Signal::Item(2), Signal::Item(3)]
        );
    }

    #[test]
    fn stats_reflect_activity() {
        let dispatcher = bounded(4, OverflowPolicy::Error, EmissionMode::Multicast);
        let (recorder, _) = Recorder::new(Some(Demand::Bounded(1)));
        dispatcher.subscribe(recorder).unwrap();
        dispatcher.publish(1).unwrap();
        dispatcher.publish(2).unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.subscribers, 1);
        // The delivered item was released on the next publish.
        assert_eq!(stats.buffered, 1);
        assert_eq!(stats.capacity, 4);
        assert!(!stats.terminated);
    }

    #[test]
    fn try_new_rejects_zero_capacity() {
        let config = DispatcherConfig {
            capacity: Capacity::Bounded(0),
            ..Default::default()
        };
        assert_eq!(
            TestDispatcher::try_new(config).unwrap_err(),
            ConfigError::ZeroCapacity
        );
    }
}
