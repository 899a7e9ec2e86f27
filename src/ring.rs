//! Bounded circular event buffer.
//!
//! [`EventRing`] is the hand-off structure between submitters and the
//! dispatcher: a fixed array of slots addressed by a monotonically growing
//! sequence number. Producers claim a sequence (failing or waiting when the
//! buffer is full), write their payload, and publish; the single consumer
//! takes payloads strictly in sequence order and releases each slot once it
//! has finished processing it. Capacity counts events from claim to
//! release, so an event still being processed keeps its slot occupied.
//!
//! The claim protocol partitions slot access, so the per-slot payload lock
//! is never contended; it only makes the hand-off safe.

use crate::error::{DispatchError, DispatchResult};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

struct Slot<T> {
    /// `sequence + 1` of the publish that filled this slot, 0 if never
    /// published. The offset keeps 0 free and disambiguates buffer laps.
    ready: AtomicU64,
    payload: Mutex<Option<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            ready: AtomicU64::new(0),
            payload: Mutex::new(None),
        }
    }

    fn lock_payload(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        match self.payload.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Multi-producer, single-consumer circular event buffer.
///
/// Capacity is fixed at construction. Sequences handed out by the claim
/// calls are unique and dense; every claimed sequence must be published
/// exactly once, and the consumer stalls on an unpublished sequence until
/// it arrives, which keeps consumption strictly FIFO.
pub struct EventRing<T> {
    slots: Box<[Slot<T>]>,
    capacity: usize,
    /// Next sequence a producer will receive.
    claimed: AtomicU64,
    /// Next sequence the consumer will take. Written only by the consumer.
    consumed: AtomicU64,
    /// Sequences whose processing has finished; producers gate on this.
    /// Written only by the consumer.
    cleared: AtomicU64,
    closed: AtomicBool,
    /// Wakes the consumer after a publish or a close.
    published: Notify,
    /// Wakes waiting producers after a release or a close.
    space: Notify,
}

impl<T> EventRing<T> {
    /// Create a ring with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Slot::empty()).collect();
        Self {
            slots,
            capacity: capacity.max(1),
            claimed: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            cleared: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            published: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Claim the next sequence without waiting.
    ///
    /// Fails with [`DispatchError::CapacityExceeded`] when every slot is
    /// taken and with [`DispatchError::QueueClosed`] after [`close`].
    ///
    /// [`close`]: EventRing::close
    pub fn try_claim(&self) -> DispatchResult<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::QueueClosed);
        }

        let mut seq = self.claimed.load(Ordering::Relaxed);
        loop {
            let cleared = self.cleared.load(Ordering::Acquire);
            if seq.saturating_sub(cleared) >= self.capacity as u64 {
                return Err(DispatchError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            match self.claimed.compare_exchange_weak(
                seq,
                seq + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(seq),
                Err(actual) => seq = actual,
            }
        }
    }

    /// Claim the next sequence, waiting for a free slot if necessary.
    ///
    /// Never fails for capacity; fails only once the ring is closed.
    pub async fn claim_blocking(&self) -> DispatchResult<u64> {
        loop {
            // Register for the space signal before checking so a slot freed
            // between the check and the await still wakes us.
            let notified = self.space.notified();
            match self.try_claim() {
                Ok(seq) => return Ok(seq),
                Err(err) if err.is_capacity_exceeded() => notified.await,
                Err(err) => return Err(err),
            }
        }
    }

    /// Publish the payload for a claimed sequence and signal the consumer.
    ///
    /// `seq` must come from a claim on this ring and be published exactly
    /// once. Publishing stays valid after `close` so claims taken before
    /// shutdown can drain.
    pub fn publish(&self, seq: u64, payload: T) {
        let slot = &self.slots[(seq % self.capacity as u64) as usize];
        *slot.lock_payload() = Some(payload);
        slot.ready.store(seq + 1, Ordering::Release);
        self.published.notify_one();
    }

    /// Take the next payload in sequence order.
    ///
    /// Waits until the consumer's cursor sequence is published. The slot
    /// stays occupied for capacity purposes until [`release`] is called
    /// with the returned sequence. Returns `None` once the ring is closed
    /// and every claimed sequence has been taken. Single-consumer: only
    /// one task may drive this.
    ///
    /// [`release`]: EventRing::release
    pub async fn next(&self) -> Option<(T, u64)> {
        let cursor = self.consumed.load(Ordering::Acquire);
        let slot = &self.slots[(cursor % self.capacity as u64) as usize];

        loop {
            let notified = self.published.notified();

            if slot.ready.load(Ordering::Acquire) == cursor + 1 {
                let payload = slot.lock_payload().take();
                debug_assert!(payload.is_some(), "published slot had no payload");
                self.consumed.store(cursor + 1, Ordering::Release);
                return payload.map(|value| (value, cursor));
            }

            if self.closed.load(Ordering::Acquire)
                && self.claimed.load(Ordering::Acquire) <= cursor
            {
                return None;
            }

            notified.await;
        }
    }

    /// Mark a taken sequence as fully processed, freeing its slot.
    ///
    /// Must be called by the consumer for every sequence [`next`] returned,
    /// in the order they were taken.
    ///
    /// [`next`]: EventRing::next
    pub fn release(&self, seq: u64) {
        debug_assert_eq!(
            seq,
            self.cleared.load(Ordering::Acquire),
            "releases must follow consumption order"
        );
        self.cleared.store(seq + 1, Ordering::Release);
        self.space.notify_one();
    }

    /// Close the ring: refuse new claims and wake every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.published.notify_one();
        self.space.notify_waiters();
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claimed sequences not yet released, including any being processed.
    pub fn len(&self) -> usize {
        let claimed = self.claimed.load(Ordering::Acquire);
        let cleared = self.cleared.load(Ordering::Acquire);
        claimed.saturating_sub(cleared) as usize
    }

    /// Whether no claimed sequence is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](EventRing::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the ring is closed and every claimed sequence was released.
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.is_empty()
    }
}
