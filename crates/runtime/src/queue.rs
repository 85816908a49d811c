//! Bounded lock-free SPSC ring buffer.
//!
//! One producer (a camera's network receive loop) and one consumer (its
//! decode loop). Indices are free-running counters masked on access;
//! capacity is rounded up to the next power of two so the mask is a
//! single AND. The producer publishes with a release store on `tail` and
//! observes the consumer with an acquire load on `head`; the consumer
//! mirrors this. Both sides are wait-free.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Bounded single-producer single-consumer queue.
///
/// A requested capacity of 0 is clamped to 1; all capacities round up to
/// the next power of two. The queue holds exactly `capacity()` items
/// when full.
pub struct BoundedQueue<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    capacity: usize,
    /// Consumer index (next slot to pop).
    head: CachePadded<AtomicUsize>,
    /// Producer index (next slot to fill).
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: the SPSC protocol gives each slot a unique owner at any point
// in time — the producer before the release store on tail, the consumer
// after the acquire load. T only needs to be Send to cross the boundary.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        Self {
            buffer,
            mask: capacity - 1,
            capacity,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Producer side. Returns the item when the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == self.capacity {
            return Err(item);
        }

        // SAFETY: this slot is outside the consumer's visible range
        // until the release store below, and there is only one producer.
        unsafe {
            (*self.buffer[tail & self.mask].get()).write(item);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer side. Returns `None` when the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        // SAFETY: the acquire load of tail makes the producer's write to
        // this slot visible, and there is only one consumer.
        let item = unsafe { (*self.buffer[head & self.mask].get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Push, dropping the oldest element first when full. Returns true
    /// when an element was dropped.
    ///
    /// This pops from the producer thread, which breaks the strict SPSC
    /// split — it is only legal when no consumer is racing on this
    /// queue's pop side at the same instant. The receive loop satisfies
    /// this: the decode worker that consumes this queue is, at worst,
    /// busy with a different camera's queue.
    pub fn push_or_drop_oldest(&self, item: T) -> bool {
        match self.push(item) {
            Ok(()) => false,
            Err(item) => {
                drop(self.pop());
                // One slot is now free and we are the only producer.
                if self.push(item).is_err() {
                    debug_assert!(false, "slot freed by pop must accept the push");
                }
                true
            }
        }
    }

    /// Approximate occupancy; exact only when both sides are quiescent.
    pub fn len(&self) -> usize {
        // Tail first: a concurrent pop can only shrink the result, never
        // push it past capacity.
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Effective capacity (power of two ≥ the requested size).
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
