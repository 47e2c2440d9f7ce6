use crate::config::DispatcherConfig;
use crate::SwapSlot;
use std::sync::{Arc, PoisonError, RwLock};

pub struct Slot<T> {
    lock: RwLock<Option<Arc<T>>>,
}

impl<T> SwapSlot<T> for Slot<T> {
    fn store(&self, item: Arc<T>) {
        *self.lock.write().unwrap_or_else(PoisonError::into_inner) = Some(item);
    }

    fn load(&self) -> Option<Arc<T>> {
        self.lock
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take(&self) -> Option<Arc<T>> {
        self.lock.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn none() -> Self {
        Slot {
            lock: RwLock::new(None),
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
