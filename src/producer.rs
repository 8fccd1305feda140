use crate::index::{is_consumed, slot_of, Index, CONSUMED_FLAG, INDEX_END};
use crate::invariants::{debug_assert_distinct, debug_assert_fresh_current, debug_assert_slot};
use crate::queue::Shared;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The producer and consumer share three atomic words: `tail`, `head`
// and the per-slot `chain[]` of next-indices.
//
// ## Who writes what
//
// - `tail`: producer (CAS only) and consumer (`fetch_or` of the
//   CONSUMED flag, CAS under the flag). The single word carries both
//   the reader boundary and the consumer's grip, so one CAS observes
//   both at once.
// - `head`: producer only.
// - `chain[]`: producer only. The consumer reads `chain[current]` and
//   nothing else, which keeps the chain free of ABA concerns despite
//   not being CAS-managed.
//
// ## Ordering protocol
//
// **Producer (publish path):**
// 1. Payload write into the staged slot (plain store, producer-owned)
// 2. `chain[current] = INDEX_END` with Relaxed (ordered by step 3)
// 3. `chain[prev_head] = current` (or `tail = current` for the first
//    message) with Release — this is the publication point
// 4. `head = current` with Release
//
// **Producer (allocation path):** `tail` CAS with AcqRel/Acquire. The
// release half makes the move visible to the consumer's next claim
// before it can observe the moved boundary; the acquire half pairs
// with the consumer's `fetch_or`.
//
// **Consumer:** claims with `fetch_or(tail, CONSUMED_FLAG)` at AcqRel,
// follows `chain[]` with Acquire loads. Every payload read is
// therefore ordered after the Release store that published the slot.
//
// Producer-private loads of `chain[]` are Relaxed: the producer is the
// only chain writer.
//
// ## CAS strength
//
// Both producer CAS sites use `compare_exchange` (strong). Their
// failure branches conclude "the consumer just touched `tail`" and act
// on it; a spurious weak-CAS failure would fabricate that conclusion
// and hand the producer a slot the consumer still holds.
//
// =============================================================================

/// Writing endpoint of a queue.
///
/// The producer owns one *staged* slot at a time. A put publishes the
/// staged slot (making it reachable for the consumer) and hands out a
/// fresh one, so a message becomes visible on the put *after* the one
/// that returned its slot. The very first put only hands out the
/// initial slot: nothing has been staged yet.
///
/// ```
/// # use freshq::MsgQueue;
/// let queue = MsgQueue::<u32>::with_capacity(3).unwrap();
/// let mut producer = queue.producer().unwrap();
///
/// producer.force_put().write(1); // stage 1
/// producer.force_put().write(2); // publish 1, stage 2
/// ```
pub struct Producer<T: Copy> {
    shared: Arc<Shared>,
    /// Slot currently staged for writing; `None` until the first put.
    current: Option<Index>,
    /// Most recently published slot; `chain[head]` is always
    /// `INDEX_END`.
    head: Option<Index>,
    /// Slot rotated out of the chain while the consumer held it; owed a
    /// re-link once the consumer moves on.
    overrun: Option<Index>,
    _payload: PhantomData<T>,
}

impl<T: Copy> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("shared", &self.shared)
            .field("current", &self.current)
            .field("head", &self.head)
            .field("overrun", &self.overrun)
            .finish()
    }
}

impl<T: Copy> Producer<T> {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            current: None,
            head: None,
            overrun: None,
            _payload: PhantomData,
        }
    }

    /// Publishes the staged slot and hands out a fresh one, discarding
    /// the oldest unread message if the queue is full.
    ///
    /// Never fails and never blocks. The returned slot must be written
    /// before the next put; the write becomes visible to the consumer
    /// when that next put publishes it. The fresh slot is guaranteed to
    /// be distinct from the slot the consumer is currently reading.
    pub fn force_put(&mut self) -> &mut MaybeUninit<T> {
        let Some(current) = self.current else {
            // First call: hand out the initial slot. Nothing is staged
            // yet, so there is nothing to publish.
            self.current = Some(0);
            self.count_put();
            return self.slot_mut(0);
        };

        let next = self.chain_next(current);
        self.publish(current);

        let tail = self.shared.region.tail().load(Ordering::Acquire);
        let consumed = is_consumed(tail);
        let full = next == slot_of(tail);

        let fresh = if let Some(parked) = self.overrun {
            // A previous overrun parked the slot the consumer was
            // reading. The queue has been full since.
            if consumed || !self.move_tail(tail) {
                // The consumer re-claimed the tail (either before our
                // load or between it and the CAS), which releases the
                // parked slot: re-link it and write there.
                self.relink(parked, next)
            } else {
                self.count_discard();
                slot_of(tail)
            }
        } else if !full {
            next
        } else if !consumed {
            if self.move_tail(tail) {
                // full means `slot_of(tail) == next`
                self.count_discard();
                next
            } else {
                // The consumer flagged the tail between our load and
                // the CAS; treat the claim as observed.
                self.overrun_swap(tail | CONSUMED_FLAG)
            }
        } else {
            self.overrun_swap(tail)
        };

        debug_assert_fresh_current!(current, fresh);
        self.current = Some(fresh);
        self.count_put();
        self.slot_mut(fresh)
    }

    /// Publishes the staged slot and hands out a fresh one only if no
    /// unread message would be discarded.
    ///
    /// Returns `None` — leaving the staged message staged and all
    /// shared state untouched — when the queue is full and the tail is
    /// in the consumer's hands, or while an overrun slot is still held.
    /// A later put (either kind) will publish the staged message.
    pub fn try_put(&mut self) -> Option<&mut MaybeUninit<T>> {
        let Some(current) = self.current else {
            self.current = Some(0);
            self.count_put();
            return Some(self.slot_mut(0));
        };

        let next = self.chain_next(current);
        let tail = self.shared.region.tail().load(Ordering::Acquire);
        let consumed = is_consumed(tail);
        let full = next == slot_of(tail);

        let fresh = if let Some(parked) = self.overrun {
            if !consumed {
                // The parked slot is still in the consumer's hands and
                // the chain is still full: refuse rather than discard.
                self.count_refusal();
                return None;
            }
            self.publish(current);
            self.relink(parked, next)
        } else {
            if full {
                self.count_refusal();
                return None;
            }
            self.publish(current);
            next
        };

        debug_assert_fresh_current!(current, fresh);
        self.current = Some(fresh);
        self.count_put();
        Some(self.slot_mut(fresh))
    }

    /// Convenience: `force_put` and write `value` into the fresh slot.
    ///
    /// Like `force_put`, this publishes the *previously* staged value;
    /// `value` itself becomes visible on the next put.
    pub fn put(&mut self, value: T) -> &mut T {
        self.force_put().write(value)
    }

    /// Stages `value` and publishes it immediately.
    ///
    /// Equivalent to writing the staged slot and calling `force_put`;
    /// use this when every message should be visible as soon as it is
    /// produced. Overwrites whatever was staged but not yet published.
    pub fn send(&mut self, value: T) {
        let staged = match self.current {
            Some(slot) => slot,
            None => {
                self.current = Some(0);
                0
            }
        };
        self.slot_mut(staged).write(value);
        let _ = self.force_put();
    }

    /// Re-borrows the staged slot, or `None` before the first put.
    pub fn current_msg(&mut self) -> Option<&mut MaybeUninit<T>> {
        match self.current {
            Some(slot) => Some(self.slot_mut(slot)),
            None => None,
        }
    }

    /// Index of the staged slot (diagnostics).
    #[inline]
    pub fn current_index(&self) -> Option<Index> {
        self.current
    }

    /// Index of the parked overrun slot, if any (diagnostics).
    #[inline]
    pub fn overrun_index(&self) -> Option<Index> {
        self.overrun
    }

    /// Links `current` onto the end of the chain and announces it as
    /// the new head.
    ///
    /// The staged payload write must be visible before the slot becomes
    /// reachable, hence the Release stores.
    fn publish(&mut self, current: Index) {
        {
            let region = &self.shared.region;
            region.chain(current).store(INDEX_END, Ordering::Relaxed);
            match self.head {
                // first message: the chain starts (and ends) here
                None => region.tail().store(current, Ordering::Release),
                Some(head) => region.chain(head).store(current, Ordering::Release),
            }
            region.head().store(current, Ordering::Release);
        }
        self.head = Some(current);
    }

    /// Advances `tail` one hop, discarding the oldest unread message.
    ///
    /// Fails iff the consumer changed `tail` (set the CONSUMED flag)
    /// after `observed` was read.
    fn move_tail(&self, observed: Index) -> bool {
        let next = self.chain_next(slot_of(observed));
        debug_assert_slot!(next, self.shared.region.slots());
        self.shared
            .region
            .tail()
            .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Escapes a consumer-held tail: jumps `tail` two hops forward and
    /// takes the slot one hop ahead, parking the held slot for a later
    /// re-link. The consumer's outstanding reference stays valid.
    ///
    /// On CAS failure the consumer released the held slot in the
    /// meantime, so the producer takes that slot instead and nothing is
    /// parked.
    fn overrun_swap(&mut self, observed: Index) -> Index {
        let held = slot_of(observed);
        let fresh = self.chain_next(held);
        let new_tail = self.chain_next(fresh);
        debug_assert_slot!(fresh, self.shared.region.slots());
        debug_assert_slot!(new_tail, self.shared.region.slots());
        debug_assert_distinct!(fresh, held);

        let swapped = self
            .shared
            .region
            .tail()
            .compare_exchange(observed, new_tail, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.overrun = Some(held);
            if self.shared.metrics_enabled() {
                self.shared.metrics.add_overrun();
                self.shared.metrics.add_discarded();
            }
            fresh
        } else {
            held
        }
    }

    /// Returns a parked overrun slot to circulation: its next-link
    /// points at the free slot the publish path would otherwise have
    /// handed out, so the chain stays a permutation of all slots.
    fn relink(&mut self, parked: Index, next: Index) -> Index {
        // The consumer cannot reach `parked` until it is re-published,
        // so a Relaxed store suffices.
        self.shared
            .region
            .chain(parked)
            .store(next, Ordering::Relaxed);
        self.overrun = None;
        parked
    }

    #[inline]
    fn chain_next(&self, slot: Index) -> Index {
        self.shared.region.chain(slot).load(Ordering::Relaxed)
    }

    fn slot_mut(&mut self, slot: Index) -> &mut MaybeUninit<T> {
        // SAFETY: `slot` is producer-owned — it sits in no chain
        // position the consumer can reach — and in bounds. The region
        // outlives `self` through the Arc, and payload size/alignment
        // were validated at queue construction.
        unsafe { &mut *self.shared.region.msg_ptr(slot).cast::<MaybeUninit<T>>() }
    }

    #[inline]
    fn count_put(&self) {
        if self.shared.metrics_enabled() {
            self.shared.metrics.add_put();
        }
    }

    #[inline]
    fn count_discard(&self) {
        if self.shared.metrics_enabled() {
            self.shared.metrics.add_discarded();
        }
    }

    #[inline]
    fn count_refusal(&self) {
        if self.shared.metrics_enabled() {
            self.shared.metrics.add_try_put_refusal();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Config, MsgQueue};

    #[test]
    fn first_put_only_allocates() {
        let queue = MsgQueue::<u64>::with_capacity(5).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        assert_eq!(producer.current_index(), None);
        producer.put(100);
        assert_eq!(producer.current_index(), Some(0));

        // nothing published yet
        assert!(consumer.get_tail().is_none());

        producer.put(101);
        assert_eq!(*consumer.get_tail().unwrap(), 100);
    }

    #[test]
    fn puts_walk_the_free_list_in_order() {
        let queue = MsgQueue::<u64>::with_capacity(5).unwrap();
        let mut producer = queue.producer().unwrap();

        for expected in 0..5 {
            producer.force_put();
            assert_eq!(producer.current_index(), Some(expected));
        }
    }

    #[test]
    fn try_put_refuses_when_full() {
        let queue = MsgQueue::<u64>::with_capacity(3).unwrap();
        let mut producer = queue.producer().unwrap();

        // allocation + two publishes fill the 3-slot chain
        assert!(producer.try_put().is_some());
        assert!(producer.try_put().is_some());
        assert!(producer.try_put().is_some());
        assert!(producer.try_put().is_none());
        // refusal left everything unchanged, so it keeps refusing
        assert!(producer.try_put().is_none());
    }

    #[test]
    fn try_put_resumes_after_consumer_drains() {
        let queue = MsgQueue::<u64>::with_capacity(3).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        producer.try_put().unwrap().write(100);
        producer.try_put().unwrap().write(101);
        producer.try_put().unwrap().write(102);
        assert!(producer.try_put().is_none());

        // the consumer claiming the tail does not free a slot: the
        // chain is still full and the tail is now held
        assert_eq!(*consumer.get_tail().unwrap(), 100);
        assert!(producer.try_put().is_none());

        // moving on releases slot 0 for the producer
        assert_eq!(*consumer.get_tail().unwrap(), 101);
        assert!(producer.try_put().is_some());
    }

    #[test]
    fn force_put_overrun_parks_and_relinks() {
        let queue = MsgQueue::<u64>::with_capacity(3).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        producer.put(100);
        producer.put(101);
        producer.put(102);

        // consumer grips the tail (slot 0)
        assert_eq!(*consumer.get_tail().unwrap(), 100);

        // full queue + held tail: the put must swap the held slot out
        producer.put(103);
        assert_eq!(producer.overrun_index(), Some(0));

        // next read releases slot 0; the following put re-links it
        let msg = consumer.get_tail().unwrap();
        assert_eq!(msg.status(), crate::ReadStatus::Skipped);
        producer.put(104);
        assert_eq!(producer.overrun_index(), None);
        assert_eq!(producer.current_index(), Some(0));
    }

    #[test]
    fn send_publishes_immediately() {
        let queue = MsgQueue::<u64>::with_capacity(5).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        producer.send(7);
        assert_eq!(*consumer.get_tail().unwrap(), 7);

        producer.send(8);
        assert_eq!(*consumer.get_tail().unwrap(), 8);
    }

    #[test]
    fn current_msg_reborrows_the_staged_slot() {
        let queue = MsgQueue::<u64>::with_capacity(5).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        assert!(producer.current_msg().is_none());
        producer.put(1);
        // rewrite the staged message before it is published
        producer.current_msg().unwrap().write(2);
        producer.force_put();
        assert_eq!(*consumer.get_tail().unwrap(), 2);
    }

    #[test]
    fn metrics_count_discards_and_overruns() {
        let queue = MsgQueue::<u64>::with_config(Config::for_payload::<u64>(3).with_metrics())
            .unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        for i in 0..3 {
            producer.put(i);
        }
        // full, consumer absent: move_tail discards one
        producer.put(3);
        let snap = queue.metrics();
        assert_eq!(snap.discarded, 1);
        assert_eq!(snap.overruns, 0);

        // full with a held tail: overrun swap
        consumer.get_tail().unwrap();
        producer.put(4);
        let snap = queue.metrics();
        assert_eq!(snap.discarded, 2);
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.puts, 5);
    }
}
