//! The capability every subscriber implements.
//!
//! All callbacks run synchronously on whichever thread triggered delivery:
//! the publishing thread, or the thread that called `request`. Callbacks for
//! one subscription never overlap and arrive in publish order. A consumer
//! that wants to process items elsewhere has to hand them off itself (see
//! [`SubscriberStream`](crate::stream::SubscriberStream)).

use crate::error::Failure;
use crate::subscription::SubscriptionHandle;
use std::sync::Arc;

/// Receiver of one subscription's signals.
pub trait Consumer<T, E>: Send + Sync + 'static {
    /// Called once, before any other callback, with the handle used to
    /// request more items or cancel from inside the callbacks.
    fn on_subscribe(&self, _subscription: &SubscriptionHandle<T, E>) {}

    /// Called for each delivered item.
    fn on_item(&self, item: Arc<T>);

    /// Called when `skipped` items were evicted before this subscriber read
    /// them. Delivery resumes with the oldest item still retained.
    fn on_overflow(&self, skipped: u64) {
        tracing::debug!(skipped, "subscriber fell behind, items skipped");
    }

    /// Called when the dispatcher completed. Always the last callback.
    fn on_complete(&self) {}

    /// Called when the dispatcher failed. Always the last callback.
    fn on_error(&self, _error: Failure<E>) {
        tracing::debug!("subscriber ignored a failure signal");
    }
}

/// Adapter that wraps a closure into a [`Consumer`] that only cares about
/// items.
pub struct FnConsumer<F>(F);

/// Builds a consumer out of an item closure.
pub fn from_fn<T, F>(f: F) -> FnConsumer<F>
where
    F: Fn(Arc<T>) + Send + Sync + 'static,
{
    FnConsumer(f)
}

impl<T, E, F> Consumer<T, E> for FnConsumer<F>
where
    F: Fn(Arc<T>) + Send + Sync + 'static,
{
    fn on_item(&self, item: Arc<T>) {
        (self.0)(item)
    }
}
