//! Slot implementations the ring buffer can be built on.
//!
//! Both flavors expose the same surface: a `Slot<T>`, a `Dispatcher<T, E>`
//! alias and a `dispatcher` constructor.

#[cfg(feature = "arcswap")]
pub mod arc_swap;

#[cfg(feature = "rwlock")]
pub mod rw_lock;
