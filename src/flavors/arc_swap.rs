use crate::config::DispatcherConfig;
use crate::SwapSlot;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Lock-free slot: loads never block the publisher and vice versa.
pub struct Slot<T> {
    shared: ArcSwapOption<T>,
}

impl<T> SwapSlot<T> for Slot<T> {
    fn store(&self, item: Arc<T>) {
        self.shared.store(Some(item))
    }

    fn load(&self) -> Option<Arc<T>> {
        self.shared.load_full()
    }

    fn take(&self) -> Option<Arc<T>> {
        self.shared.swap(None)
    }

    fn none() -> Self {
        Slot {
            shared: ArcSwapOption::new(None),
        }
    }
}

pub type Dispatcher<T, E> = crate::dispatcher::Dispatcher<T, E, Slot<T>>;

pub fn dispatcher<T, E>(config: DispatcherConfig) -> Dispatcher<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    crate::dispatcher::Dispatcher::new(config)
}
