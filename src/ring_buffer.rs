use crate::swap_slot::SwapSlot;
use arc_swap::ArcSwap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of reading one sequence number from the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read<T> {
    /// The item published under that sequence.
    Item(Arc<T>),
    /// The sequence was evicted; `oldest` is the first one still retained.
    Evicted { oldest: u64 },
    /// Nothing has been published under that sequence yet.
    NotYetAvailable,
}

/// Circular storage addressed by monotonically increasing sequence numbers.
///
/// Item `seq` lives in slot `seq % capacity`. Everything in `[head, tail)` is
/// retained; the write cursor (`tail`) only ever advances.
///
/// Only one thread may call the writer-side methods (`store`, `evict_oldest`,
/// `release_to`, `grow`) at a time. `read` may run concurrently with any of
/// them: a slot is fully stored before `tail` is advanced past it, and `head`
/// is advanced before a slot is recycled, so a reader re-checking `head` after
/// loading a slot can tell a recycled slot from a valid one.
pub struct RingBuffer<T, S: SwapSlot<T>> {
    /// Circular buffer, replaced wholesale when it grows
    buffer: ArcSwap<Vec<S>>,
    /// Sequence of the oldest retained item
    head: AtomicU64,
    /// Write index pointer
    tail: AtomicU64,
    ph: PhantomData<T>,
}

fn slot_index(seq: u64, len: usize) -> usize {
    (seq % len as u64) as usize
}

fn empty_slots<T, S: SwapSlot<T>>(len: usize) -> Vec<S> {
    (0..len).map(|_| S::none()).collect()
}

impl<T, S: SwapSlot<T>> RingBuffer<T, S> {
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, 0)
    }

    pub(crate) fn starting_at(capacity: usize, seq: u64) -> Self {
        Self {
            buffer: ArcSwap::from_pointee(empty_slots(capacity.max(1))),
            head: AtomicU64::new(seq),
            tail: AtomicU64::new(seq),
            ph: PhantomData,
        }
    }

    /// Stores `item` at the write cursor and returns its sequence number.
    ///
    /// A full buffer hands the item back untouched; deciding what to do about
    /// it is the caller's business.
    pub fn store(&self, item: Arc<T>) -> Result<u64, Arc<T>> {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        let buffer = self.buffer.load();
        if tail - head >= buffer.len() as u64 {
            return Err(item);
        }
        buffer[slot_index(tail, buffer.len())].store(item);
        self.tail.store(tail + 1, Ordering::Release);
        Ok(tail)
    }

    /// Reads the item published under `seq`. Never blocks.
    pub fn read(&self, seq: u64) -> Read<T> {
        if seq >= self.tail.load(Ordering::Acquire) {
            return Read::NotYetAvailable;
        }
        let head = self.head.load(Ordering::Acquire);
        if seq < head {
            return Read::Evicted { oldest: head };
        }
        let buffer = self.buffer.load();
        let val = buffer[slot_index(seq, buffer.len())].load();
        // The writer may have recycled the slot between the two head loads.
        let head = self.head.load(Ordering::Acquire);
        if seq < head {
            return Read::Evicted { oldest: head };
        }
        match val {
            Some(item) => Read::Item(item),
            None => Read::NotYetAvailable,
        }
    }

    /// Evicts the oldest retained item, returning it.
    pub fn evict_oldest(&self) -> Option<Arc<T>> {
        let head = self.head.load(Ordering::Acquire);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        self.head.store(head + 1, Ordering::Release);
        let buffer = self.buffer.load();
        buffer[slot_index(head, buffer.len())].take()
    }

    /// Releases every item below `seq` (clamped to the write cursor).
    /// Returns how many items were released.
    pub fn release_to(&self, seq: u64) -> u64 {
        let head = self.head.load(Ordering::Acquire);
        let target = seq.min(self.tail.load(Ordering::Acquire));
        if target <= head {
            return 0;
        }
        self.head.store(target, Ordering::Release);
        let buffer = self.buffer.load();
        for released in head..target {
            buffer[slot_index(released, buffer.len())].take();
        }
        target - head
    }

    /// Doubles the capacity, keeping every retained item at its sequence.
    pub fn grow(&self) {
        let old = self.buffer.load_full();
        let len = old.len() * 2;
        let fresh: Vec<S> = empty_slots(len);
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        for seq in head..tail {
            if let Some(item) = old[slot_index(seq, old.len())].load() {
                fresh[slot_index(seq, len)].store(item);
            }
        }
        self.buffer.store(Arc::new(fresh));
        tracing::debug!(from = old.len(), to = len, "ring buffer grown");
    }

    /// Returns the retained items, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head..tail)
            .filter_map(|seq| match self.read(seq) {
                Read::Item(item) => Some(item),
                _ => None,
            })
            .collect()
    }

    /// Sequence of the oldest retained item.
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Sequence the next stored item will get.
    pub fn tail(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.buffer.load().len()
    }

    /// Returns the number of retained items
    pub fn len(&self) -> usize {
        (self.tail() - self.head()) as usize
    }

    /// Checks if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.tail() == self.head()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

impl<T, S: SwapSlot<T>> fmt::Debug for RingBuffer<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("head", &self.head())
            .field("tail", &self.tail())
            .field("capacity", &self.capacity())
            .finish()
    }
}
