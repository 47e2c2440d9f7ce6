//! # Bounded Reactive Dispatch Core
//!
//!  A publish/subscribe core that sits between a fast producer and slower consumers. Published
//!  items are buffered in a ring of Arc(s) and fanned out to every subscription, each of which
//!  advances its own cursor only as far as its consumer asked for.
//!
//!  What happens when the ring fills up is a configuration choice, not an accident of timing.
//!
//! ## Features
//!  * Demand-driven - a subscription receives at most what its consumer `request`ed. A consumer
//!    that never asks for anything never blocks the others.
//!  * Bounded - capacity is fixed unless the configuration says otherwise. The **OverflowPolicy**
//!    decides what a full buffer does: fail the dispatcher (**Error**), discard the incoming item
//!    (**DropLatest**, **Drop**), evict the oldest item (**DropOldest**), or grow (**Unbounded**).
//!  * Never blocks the producer - every policy resolves a full buffer immediately.
//!  * Emission modes - **Unicast** (one live subscription, which also gets whatever was buffered
//!    before it attached), **Multicast** (subscriptions start at the write cursor) and
//!    **MulticastReplay** (late subscriptions are seeded with the last N, or all, items).
//!  * Push delivery - consumer callbacks run on the thread that published or requested. Callbacks
//!    for one subscription never overlap and arrive in publish order.
//!  * Async adapters - a subscription as a **futures::stream::Stream** and the publishing side as a
//!    **futures::sink::Sink**.
//!
//! ## Termination
//!
//! `complete` and `fail` end the dispatcher exactly once. Each subscription receives the terminal
//! signal after every item published before it, and nothing after it. A buffer overflow under the
//! **Error** policy terminates the dispatcher the same way. Dropping the last **Dispatcher**
//! completes it; subscription handles can still drain what was published before.
//!
//! # Examples
//!
//! ## Callback consumer
//!
//! ```rust
//! use reactive_dispatch::{consumer, dispatcher, Demand, DispatcherConfig};
//! use std::sync::{Arc, Mutex};
//!
//! let dispatcher = dispatcher::<u32, ()>(DispatcherConfig::multicast());
//! let received = Arc::new(Mutex::new(Vec::new()));
//! let sink = received.clone();
//! let subscription = dispatcher
//!     .subscribe(consumer::from_fn(move |item: Arc<u32>| sink.lock().unwrap().push(*item)))
//!     .unwrap();
//!
//! (1..4).for_each(|x| dispatcher.publish(x).unwrap());
//! // Nothing was requested yet.
//! assert!(received.lock().unwrap().is_empty());
//!
//! subscription.request(Demand::Unbounded);
//! assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
//! ```
//!
//! ## Replay to a late subscriber
//!
//! ```rust
//! use reactive_dispatch::{dispatcher, DispatcherConfig, Retention};
//! use futures::executor::block_on_stream;
//!
//! let dispatcher = dispatcher::<u32, ()>(DispatcherConfig::replay(Retention::KeepLast(2)));
//! (1..5).for_each(|x| dispatcher.publish(x).unwrap());
//!
//! let subscriber = dispatcher.subscribe_stream(16).unwrap();
//! dispatcher.publish(5).unwrap();
//! dispatcher.complete().unwrap();
//!
//! let received: Vec<u32> = block_on_stream(subscriber).map(|x| *x.unwrap()).collect();
//! assert_eq!(received, vec![3, 4, 5]);
//! ```
//!
//! ## Overflow policies
//!
//! ```rust
//! use reactive_dispatch::{dispatcher, Capacity, DispatcherConfig, EmissionMode, OverflowPolicy};
//!
//! let config = DispatcherConfig::builder()
//!     .capacity(Capacity::Bounded(3))
//!     .overflow_policy(OverflowPolicy::DropOldest)
//!     .emission_mode(EmissionMode::Unicast)
//!     .build()
//!     .unwrap();
//! let dispatcher = dispatcher::<u32, ()>(config);
//! (0..5).for_each(|x| dispatcher.publish(x).unwrap());
//!
//! // Only the last three items are still buffered.
//! let buffered: Vec<u32> = dispatcher.buffered().iter().map(|x| **x).collect();
//! assert_eq!(buffered, vec![2, 3, 4]);
//! ```

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod flavors;
pub mod overflow;
pub mod replay;
pub mod ring_buffer;
pub mod sink;
pub mod stream;
pub mod subscription;
mod swap_slot;

pub use swap_slot::SwapSlot;

pub use config::{
    Capacity, DispatcherConfig, DispatcherConfigBuilder, EmissionMode, OverflowPolicy, Retention,
};
pub use consumer::{from_fn, Consumer, FnConsumer};
pub use dispatcher::{DispatcherStats, Termination};
pub use error::{ConfigError, Failure, PublishError, SubscribeError};
pub use sink::DispatcherSink;
pub use stream::SubscriberStream;
pub use subscription::{Demand, SubscriptionHandle, SubscriptionId};

#[cfg(feature = "arcswap")]
pub use flavors::arc_swap::{dispatcher, Dispatcher, Slot};
