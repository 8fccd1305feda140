use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local counters for one producer/consumer pair.
///
/// The counters live next to the queue handle, not in the shared
/// region, so the persistent layout stays exactly
/// `[head][tail][chain][payload]`. Producer-written and
/// consumer-written counters sit on separate cache lines; the two
/// endpoints bump them from different threads on every operation.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    producer: CachePadded<ProducerCounters>,
    consumer: CachePadded<ConsumerCounters>,
}

#[derive(Debug, Default)]
struct ProducerCounters {
    puts: AtomicU64,
    discarded: AtomicU64,
    overruns: AtomicU64,
    try_put_refusals: AtomicU64,
}

#[derive(Debug, Default)]
struct ConsumerCounters {
    reads: AtomicU64,
    repeats: AtomicU64,
    skips: AtomicU64,
    empty_polls: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_put(&self) {
        self.producer.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// One unread message was dropped to make room for a fresh one.
    #[inline]
    pub(crate) fn add_discarded(&self) {
        self.producer.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// The producer swapped a consumer-held slot out of the chain.
    #[inline]
    pub(crate) fn add_overrun(&self) {
        self.producer.overruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_try_put_refusal(&self) {
        self.producer.try_put_refusals.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_read(&self) {
        self.consumer.reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_repeat(&self) {
        self.consumer.repeats.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_skip(&self) {
        self.consumer.skips.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_empty_poll(&self) {
        self.consumer.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            puts: self.producer.puts.load(Ordering::Relaxed),
            discarded: self.producer.discarded.load(Ordering::Relaxed),
            overruns: self.producer.overruns.load(Ordering::Relaxed),
            try_put_refusals: self.producer.try_put_refusals.load(Ordering::Relaxed),
            reads: self.consumer.reads.load(Ordering::Relaxed),
            repeats: self.consumer.repeats.load(Ordering::Relaxed),
            skips: self.consumer.skips.load(Ordering::Relaxed),
            empty_polls: self.consumer.empty_polls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Successful `force_put`/`try_put` calls (including the first,
    /// allocation-only one).
    pub puts: u64,
    /// Unread messages dropped by the producer to make room.
    pub discarded: u64,
    /// Slot swaps performed to escape a consumer-held tail.
    pub overruns: u64,
    /// `try_put` calls that returned `None`.
    pub try_put_refusals: u64,
    /// Messages the consumer advanced to for the first time.
    pub reads: u64,
    /// Reads that returned the previous message again.
    pub repeats: u64,
    /// Reads that adopted a producer-moved boundary (messages lost).
    pub skips: u64,
    /// Reads on a queue that had never published.
    pub empty_polls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counts() {
        let metrics = Metrics::new();
        metrics.add_put();
        metrics.add_put();
        metrics.add_discarded();
        metrics.add_overrun();
        metrics.add_read();
        metrics.add_repeat();
        metrics.add_skip();
        metrics.add_empty_poll();
        metrics.add_try_put_refusal();

        let snap = metrics.snapshot();
        assert_eq!(snap.puts, 2);
        assert_eq!(snap.discarded, 1);
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.try_put_refusals, 1);
        assert_eq!(snap.reads, 1);
        assert_eq!(snap.repeats, 1);
        assert_eq!(snap.skips, 1);
        assert_eq!(snap.empty_polls, 1);
    }
}
