//! A subscription consumed as an asynchronous stream.
//!
//! Delivery into the stream happens on the publishing thread; the consumer
//! callback only enqueues and wakes the task polling the stream. Demand is
//! managed on the stream's behalf: `prefetch` items are requested up front
//! and replenished in batches as the task takes them out.

use crate::consumer::Consumer;
use crate::dispatcher::Dispatcher;
use crate::error::{Failure, SubscribeError};
use crate::subscription::{Demand, SubscriptionHandle};
use crate::swap_slot::SwapSlot;
use event_listener::{Event, EventListener};
use futures_core::{
    future::Future,
    task::{self, Poll},
    FusedStream, Stream,
};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Signal<T, E> = Result<Arc<T>, Failure<E>>;

struct Inbox<T, E> {
    signals: VecDeque<Signal<T, E>>,
    /// The terminal signal arrived
    closed: bool,
}

struct StreamState<T, E> {
    inbox: Mutex<Inbox<T, E>>,
    event: Event,
    skipped: AtomicU64,
}

impl<T, E> StreamState<T, E> {
    fn inbox(&self) -> MutexGuard<'_, Inbox<T, E>> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, signal: Option<Signal<T, E>>, closes: bool) {
        {
            let mut inbox = self.inbox();
            if let Some(signal) = signal {
                inbox.signals.push_back(signal);
            }
            inbox.closed |= closes;
        }
        self.event.notify(usize::MAX);
    }
}

struct StreamConsumer<T, E> {
    state: Arc<StreamState<T, E>>,
}

impl<T, E> Consumer<T, E> for StreamConsumer<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn on_item(&self, item: Arc<T>) {
        self.state.push(Some(Ok(item)), false);
    }

    fn on_overflow(&self, skipped: u64) {
        self.state.skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    fn on_complete(&self) {
        self.state.push(None, true);
    }

    fn on_error(&self, error: Failure<E>) {
        self.state.push(Some(Err(error)), true);
    }
}

/// Stream of one subscription's signals.
///
/// Yields `Ok(item)` for each item, then `Err(failure)` once if the
/// dispatcher failed, then ends. Completion ends the stream directly.
/// Dropping the stream cancels the subscription.
pub struct SubscriberStream<T, E> {
    state: Arc<StreamState<T, E>>,
    handle: SubscriptionHandle<T, E>,
    listener: Option<EventListener>,
    /// Items taken since the last replenishing request
    consumed: u64,
    limit: u64,
}

impl<T, E, S> Dispatcher<T, E, S>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: SwapSlot<T> + Send + Sync + 'static,
{
    /// Subscribes a [`SubscriberStream`] that keeps at most `prefetch` items
    /// requested ahead of the task consuming it. A `prefetch` of 0 is
    /// treated as 1.
    pub fn subscribe_stream(
        &self,
        prefetch: usize,
    ) -> Result<SubscriberStream<T, E>, SubscribeError> {
        let prefetch = prefetch.max(1) as u64;
        let state = Arc::new(StreamState {
            inbox: Mutex::new(Inbox {
                signals: VecDeque::new(),
                closed: false,
            }),
            event: Event::new(),
            skipped: AtomicU64::new(0),
        });
        let handle = self.subscribe(StreamConsumer {
            state: state.clone(),
        })?;
        handle.request(Demand::Bounded(prefetch));
        Ok(SubscriberStream {
            state,
            handle,
            listener: None,
            consumed: 0,
            limit: prefetch - prefetch / 4,
        })
    }
}

enum Next<T, E> {
    Signal(Signal<T, E>),
    End,
    Empty,
}

impl<T, E> SubscriberStream<T, E> {
    pub fn handle(&self) -> &SubscriptionHandle<T, E> {
        &self.handle
    }

    /// Items the dispatcher evicted before this stream could take them.
    pub fn skipped(&self) -> u64 {
        self.state.skipped.load(Ordering::Relaxed)
    }

    /// Returns the number of signals waiting to be taken.
    pub fn len(&self) -> usize {
        self.state.inbox().signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_next(&mut self) -> Next<T, E> {
        let next = {
            let mut inbox = self.state.inbox();
            match inbox.signals.pop_front() {
                Some(signal) => Next::Signal(signal),
                None if inbox.closed => Next::End,
                None => Next::Empty,
            }
        };
        if let Next::Signal(Ok(_)) = next {
            self.consumed += 1;
            if self.consumed >= self.limit {
                // Delivers synchronously into the inbox, so the lock is released.
                self.handle.request(Demand::Bounded(self.consumed));
                self.consumed = 0;
            }
        }
        next
    }
}

impl<T, E> Stream for SubscriberStream<T, E> {
    type Item = Signal<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // If this stream is blocked on an event, first make sure it is unblocked.
            if let Some(listener) = self.listener.as_mut() {
                futures_core::ready!(Pin::new(listener).poll(cx));
                self.listener = None;
            }
            loop {
                match self.try_next() {
                    Next::Signal(signal) => {
                        self.listener = None;
                        return Poll::Ready(Some(signal));
                    }
                    Next::End => {
                        self.listener = None;
                        return Poll::Ready(None);
                    }
                    Next::Empty => {}
                }
                // Listen for a delivery, then look again before sleeping.
                match self.listener.as_mut() {
                    None => self.listener = Some(self.state.event.listen()),
                    Some(_) => break,
                }
            }
        }
    }
}

impl<T, E> FusedStream for SubscriberStream<T, E> {
    fn is_terminated(&self) -> bool {
        let inbox = self.state.inbox();
        inbox.closed && inbox.signals.is_empty()
    }
}

impl<T, E> Drop for SubscriberStream<T, E> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl<T, E> fmt::Debug for SubscriberStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberStream")
            .field("subscription", &self.handle.id())
            .field("queued", &self.len())
            .finish()
    }
}
