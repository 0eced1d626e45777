//! Bounded, lock-free MPMC ring buffer.
//!
//! The queue uses the sequence-counter slot protocol: every slot carries its
//! own atomic counter that encodes, relative to the monotonically increasing
//! producer/consumer tickets, whether the slot is free, filled, or mid-handoff.
//! Producers contend only on `tail` and the tail slot, consumers only on
//! `head` and the head slot.
//!
//! Slot state for a ticket `k` landing on slot `k & mask`:
//!
//! ```text
//! sequence == k              slot free, claimable by producer ticket k
//! sequence == k + 1          slot filled, claimable by consumer ticket k
//! sequence == k + capacity   slot recycled, free for producer ticket k + capacity
//! ```
//!
//! The acquire load of a slot's sequence pairs with the release store made by
//! the previous owner, so the data write is visible before the slot is handed
//! over. The CAS on `head`/`tail` is acquire-release and only serializes
//! claimants; it carries no data. Nothing here needs sequentially-consistent
//! ordering.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::{Error, Result};

/// One ring cell. `CachePadded` in the slot array keeps neighbouring slots on
/// separate cache lines, so producers and consumers touching adjacent tickets
/// do not false-share.
struct Slot<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded multi-producer multi-consumer queue.
///
/// Capacity must be a power of two, at least 2. `try_enqueue` and
/// `try_dequeue` never block, never allocate, and fail only when the queue is
/// observably full (resp. empty) at the moment of the attempt.
///
/// Every item enqueued successfully is dequeued exactly once. Dequeue order
/// matches enqueue order when observed sequentially; across concurrent
/// consumers no inter-thread ordering is promised.
pub struct MpmcQueue<T> {
    slots: Box<[CachePadded<Slot<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a queue with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] unless `capacity` is a power
    /// of two and at least 2.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(Error::InvalidConfiguration(format!(
                "queue capacity must be a power of two >= 2, got {capacity}"
            )));
        }

        // sequence == slot index marks every slot as free for the first lap.
        let slots = (0..capacity)
            .map(|i| {
                CachePadded::new(Slot {
                    sequence: AtomicUsize::new(i),
                    data: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Attempt to enqueue `item`.
    ///
    /// Returns `Err(item)` (handing the item back) only when the queue is
    /// full. That refusal is the caller's backpressure signal.
    pub fn try_enqueue(&self, item: T) -> std::result::Result<(), T> {
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[tail & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - tail as isize;

            if diff == 0 {
                // Slot is free for this ticket; race other producers for it.
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // We own the slot. The release store below publishes
                        // this write to the consumer with ticket `tail`.
                        unsafe { (*slot.data.get()).write(item) };
                        slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if diff < 0 {
                // Ticket from a previous lap still occupies the slot: full.
                return Err(item);
            } else {
                // Another producer advanced past us; chase the tail.
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to dequeue an item. Returns `None` only when the queue is
    /// empty at the moment of the attempt.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[head & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - head.wrapping_add(1) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let item = unsafe { (*slot.data.get()).assume_init_read() };
                        // +capacity re-arms the slot for the producer one lap
                        // ahead; this is what makes the ring wrap cleanly.
                        slot.sequence
                            .store(head.wrapping_add(self.capacity()), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => head = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of queued items.
    ///
    /// The two counter loads are not taken atomically, so the result can be
    /// transiently stale under contention; it is exact under quiescence.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    /// Whether the queue appears empty. Same staleness caveat as [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed slot count.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        // Items still in flight at drop time are drained through the normal
        // protocol so their destructors run exactly once.
        while self.try_dequeue().is_some() {}
    }
}

impl<T> fmt::Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
