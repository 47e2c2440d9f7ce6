use crate::dispatcher::Dispatcher;
use crate::error::PublishError;
use crate::swap_slot::SwapSlot;
use futures_core::task::{self, Poll};
use futures_sink::Sink;
use std::pin::Pin;

/// Publishing side of a dispatcher as a [`Sink`].
///
/// Publishing never waits, so the sink is always ready until the
/// dispatcher terminates. Closing the sink completes the dispatcher.
pub struct DispatcherSink<T, E: Clone, S: SwapSlot<T>> {
    dispatcher: Dispatcher<T, E, S>,
}

impl<T, E, S> Dispatcher<T, E, S>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: SwapSlot<T> + Send + Sync + 'static,
{
    pub fn sink(&self) -> DispatcherSink<T, E, S> {
        DispatcherSink {
            dispatcher: self.clone(),
        }
    }
}

impl<T, E, S> Sink<T> for DispatcherSink<T, E, S>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: SwapSlot<T> + Send + Sync + 'static,
{
    type Error = PublishError;

    fn poll_ready(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        if self.dispatcher.is_terminated() {
            return Poll::Ready(Err(PublishError::Terminated));
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: T) -> Result<(), Self::Error> {
        self.dispatcher.publish(item)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        // Delivery already happened inside `start_send`.
        Poll::Ready(Ok(()))
    }

    fn poll_close(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        match self.dispatcher.complete() {
            Ok(()) | Err(PublishError::Terminated) => Poll::Ready(Ok(())),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl<T, E: Clone, S: SwapSlot<T>> Clone for DispatcherSink<T, E, S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T, E: Clone, S: SwapSlot<T>> PartialEq for DispatcherSink<T, E, S> {
    fn eq(&self, other: &DispatcherSink<T, E, S>) -> bool {
        self.dispatcher == other.dispatcher
    }
}

impl<T, E: Clone, S: SwapSlot<T>> Eq for DispatcherSink<T, E, S> {}
