use crate::index::{is_consumed, slot_of, Index, CONSUMED_FLAG, INDEX_END};
use crate::queue::Shared;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// How a message reached the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Advanced to a message not delivered before.
    Fresh,
    /// No newer message was published; the previous one is returned
    /// again.
    Unchanged,
    /// The producer moved the reader boundary; one or more intermediate
    /// messages were discarded.
    Skipped,
}

/// A borrowed message.
///
/// The reference stays valid — and the producer is guaranteed not to
/// write into the slot — until the next call on the consumer. Even when
/// the producer overruns the reader, the held slot is rotated out of
/// circulation rather than reused, so the bytes underneath never change
/// while this is alive.
pub struct MsgRef<'a, T> {
    value: &'a T,
    status: ReadStatus,
}

impl<'a, T> MsgRef<'a, T> {
    /// Why this message was delivered.
    #[inline]
    pub fn status(&self) -> ReadStatus {
        self.status
    }

    /// Unwraps into the plain reference.
    #[inline]
    pub fn into_ref(self) -> &'a T {
        self.value
    }
}

impl<T> Deref for MsgRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

/// Reading endpoint of a queue.
///
/// Two read modes: [`get_tail`](Consumer::get_tail) walks the chain in
/// FIFO order, [`get_head`](Consumer::get_head) jumps straight to the
/// newest message. Both return `None` only while nothing has ever been
/// published.
pub struct Consumer<T: Copy> {
    shared: Arc<Shared>,
    /// Slot currently held for reading; `None` until the first read.
    current: Option<Index>,
    _payload: PhantomData<T>,
}

impl<T: Copy> std::fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("shared", &self.shared)
            .field("current", &self.current)
            .finish()
    }
}

impl<T: Copy> Consumer<T> {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            current: None,
            _payload: PhantomData,
        }
    }

    /// Returns the oldest unread message, or the current one again when
    /// nothing newer was published.
    ///
    /// The `fetch_or` both claims the tail slot and reports where the
    /// boundary was, in one atomic step; the producer's CAS on `tail`
    /// fails the moment the flag appears, which is what keeps the claim
    /// race-free.
    pub fn get_tail(&mut self) -> Option<MsgRef<'_, T>> {
        let tail = self
            .shared
            .region
            .tail()
            .fetch_or(CONSUMED_FLAG, Ordering::AcqRel);

        if tail == INDEX_END {
            // OR-ing the flag into INDEX_END leaves it unchanged, so an
            // empty queue stays empty.
            self.count_empty();
            return None;
        }

        let (slot, status) = if is_consumed(tail) {
            match self.current {
                None => {
                    // Reachable only through get_head's empty-head
                    // window: the flag is set but nothing is held yet.
                    (slot_of(tail), ReadStatus::Fresh)
                }
                Some(held) => {
                    let next = self.chain_next(held);
                    if next == INDEX_END {
                        // nothing newer; the held slot stays valid
                        (held, ReadStatus::Unchanged)
                    } else if self
                        .shared
                        .region
                        .tail()
                        .compare_exchange(
                            tail,
                            next | CONSUMED_FLAG,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        (next, ReadStatus::Fresh)
                    } else {
                        // the producer moved the boundary under our
                        // claim (an overrun): re-claim whatever it is now
                        let moved = self
                            .shared
                            .region
                            .tail()
                            .fetch_or(CONSUMED_FLAG, Ordering::AcqRel);
                        (slot_of(moved), ReadStatus::Skipped)
                    }
                }
            }
        } else {
            // The flag was clear: the producer moved the boundary since
            // our last claim. Adopt it directly.
            match self.current {
                None => (slot_of(tail), ReadStatus::Fresh),
                Some(_) => (slot_of(tail), ReadStatus::Skipped),
            }
        };

        self.current = Some(slot);
        self.count_read(status);
        Some(MsgRef {
            value: self.msg_ref(slot),
            status,
        })
    }

    /// Jumps to the newest published message, skipping intermediates
    /// unconditionally.
    ///
    /// The claim is only accepted when the producer did not move `tail`
    /// between the claim and the jump; otherwise the boundary could
    /// already have been pushed past `head` and the jump would land on
    /// the producer's staged slot.
    pub fn get_head(&mut self) -> Option<MsgRef<'_, T>> {
        loop {
            let tail = self
                .shared
                .region
                .tail()
                .fetch_or(CONSUMED_FLAG, Ordering::AcqRel);

            if tail == INDEX_END {
                self.count_empty();
                return None;
            }

            let head = self.shared.region.head().load(Ordering::Acquire);
            if head == INDEX_END {
                // The first publish stores tail before head; in that
                // window there is no coherent head to jump to.
                self.count_empty();
                return None;
            }

            if self
                .shared
                .region
                .tail()
                .compare_exchange(
                    tail | CONSUMED_FLAG,
                    head | CONSUMED_FLAG,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                let status = if self.current == Some(head) {
                    ReadStatus::Unchanged
                } else {
                    ReadStatus::Fresh
                };
                self.current = Some(head);
                self.count_read(status);
                return Some(MsgRef {
                    value: self.msg_ref(head),
                    status,
                });
            }
            // the producer moved the boundary mid-jump; take a fresh claim
        }
    }

    /// Index of the held slot (diagnostics).
    #[inline]
    pub fn current_index(&self) -> Option<Index> {
        self.current
    }

    #[inline]
    fn chain_next(&self, slot: Index) -> Index {
        self.shared.region.chain(slot).load(Ordering::Acquire)
    }

    fn msg_ref(&self, slot: Index) -> &T {
        // SAFETY: `slot` was reached through the tail/chain protocol,
        // so its payload was fully written before the Release store
        // that made it reachable, and our Acquire claim synchronizes
        // with that store. The producer stays out of a held slot until
        // the claim moves on (overruns rotate the slot out instead of
        // reusing it).
        unsafe { &*self.shared.region.msg_ptr(slot).cast::<T>() }
    }

    #[inline]
    fn count_empty(&self) {
        if self.shared.metrics_enabled() {
            self.shared.metrics.add_empty_poll();
        }
    }

    fn count_read(&self, status: ReadStatus) {
        if self.shared.metrics_enabled() {
            match status {
                ReadStatus::Fresh => self.shared.metrics.add_read(),
                ReadStatus::Unchanged => self.shared.metrics.add_repeat(),
                ReadStatus::Skipped => self.shared.metrics.add_skip(),
            }
        }
    }
}
