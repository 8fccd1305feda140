use crate::config::{Config, MSG_ALIGN};
use crate::consumer::Consumer;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::producer::Producer;
use crate::region::SharedRegion;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by queue construction and endpoint registration.
///
/// Running out of room is never an error: a full queue under
/// `force_put` discards, and `try_put`/`get_tail`/`get_head` signal
/// "nothing to do" with `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Fewer than the three slots the overrun algorithm needs.
    #[error("capacity {got} is below the minimum of 3 slots")]
    CapacityTooSmall {
        /// The rejected slot count.
        got: u32,
    },
    /// The allocator (or mapping call) returned no usable memory.
    #[error("backing region allocation failed")]
    AllocationFailed,
    /// The payload type does not fit the region's message size.
    #[error("payload of {payload} bytes exceeds the {msg_size}-byte slots")]
    PayloadTooLarge {
        /// Size of the payload type.
        payload: usize,
        /// Slot size the region was built with.
        msg_size: usize,
    },
    /// The payload type needs more alignment than slots guarantee.
    #[error("payload alignment {align} exceeds the 16-byte slot alignment")]
    PayloadOveraligned {
        /// Alignment of the payload type.
        align: usize,
    },
    /// The producer endpoint was already handed out.
    #[error("producer endpoint already taken")]
    ProducerTaken,
    /// The consumer endpoint was already handed out.
    #[error("consumer endpoint already taken")]
    ConsumerTaken,
    /// An attached region is smaller than the configured layout.
    #[error("shared region holds {got} bytes but the layout needs {need}")]
    RegionTooSmall {
        /// Bytes the layout requires.
        need: usize,
        /// Bytes the region actually holds.
        got: usize,
    },
    /// A shared-memory system call failed.
    #[cfg(all(unix, feature = "shm"))]
    #[error("{call} failed with errno {errno}")]
    Shm {
        /// The libc call that failed.
        call: &'static str,
        /// Its errno.
        errno: i32,
    },
}

/// State shared between the queue handle and its endpoints.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) region: SharedRegion,
    pub(crate) metrics: Metrics,
    producer_taken: AtomicBool,
    consumer_taken: AtomicBool,
}

impl Shared {
    #[inline]
    pub(crate) fn metrics_enabled(&self) -> bool {
        self.region.config().enable_metrics
    }
}

/// A lossy SPSC message queue over a flat backing region.
///
/// The handle owns the region (through an `Arc`) and hands out exactly
/// one [`Producer`] and one [`Consumer`]. Payloads are fixed-size
/// `Copy` values; the queue never looks inside them.
///
/// Cloning the handle clones the `Arc`, not the queue: across all
/// clones, only one producer and one consumer are ever handed out.
pub struct MsgQueue<T: Copy> {
    shared: Arc<Shared>,
    _payload: PhantomData<T>,
}

impl<T: Copy> std::fmt::Debug for MsgQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgQueue").field("shared", &self.shared).finish()
    }
}

impl<T: Copy> MsgQueue<T> {
    /// Allocates a queue with `slots` cells sized for `T`.
    pub fn with_capacity(slots: u32) -> Result<Self, QueueError> {
        Self::with_config(Config::for_payload::<T>(slots))
    }

    /// Allocates a queue from an explicit configuration.
    pub fn with_config(config: Config) -> Result<Self, QueueError> {
        Self::from_region(SharedRegion::allocate(config)?)
    }

    /// Wraps an already constructed region (heap or shared memory).
    ///
    /// Validates that `T` fits a slot; the region's `msg_size` may be
    /// larger than `T`, which lets differently typed views share one
    /// wire layout.
    pub fn from_region(region: SharedRegion) -> Result<Self, QueueError> {
        let config = region.config();
        if mem::size_of::<T>() > config.msg_stride() {
            return Err(QueueError::PayloadTooLarge {
                payload: mem::size_of::<T>(),
                msg_size: config.msg_stride(),
            });
        }
        if mem::align_of::<T>() > MSG_ALIGN {
            return Err(QueueError::PayloadOveraligned {
                align: mem::align_of::<T>(),
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                region,
                metrics: Metrics::new(),
                producer_taken: AtomicBool::new(false),
                consumer_taken: AtomicBool::new(false),
            }),
            _payload: PhantomData,
        })
    }

    /// Hands out the producer endpoint. At most one exists per queue.
    pub fn producer(&self) -> Result<Producer<T>, QueueError> {
        if self.shared.producer_taken.swap(true, Ordering::AcqRel) {
            return Err(QueueError::ProducerTaken);
        }
        Ok(Producer::new(Arc::clone(&self.shared)))
    }

    /// Hands out the consumer endpoint. At most one exists per queue.
    pub fn consumer(&self) -> Result<Consumer<T>, QueueError> {
        if self.shared.consumer_taken.swap(true, Ordering::AcqRel) {
            return Err(QueueError::ConsumerTaken);
        }
        Ok(Consumer::new(Arc::clone(&self.shared)))
    }

    /// Number of payload slots.
    #[inline]
    pub fn slots(&self) -> u32 {
        self.shared.region.slots()
    }

    /// The configuration the backing region was built with.
    #[inline]
    pub fn config(&self) -> Config {
        self.shared.region.config()
    }

    /// Snapshot of the process-local counters. All zeros unless the
    /// queue was built with [`Config::enable_metrics`].
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.config().enable_metrics {
            self.shared.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl<T: Copy> Clone for MsgQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _payload: PhantomData,
        }
    }
}

// Note: Producer and Consumer intentionally do NOT implement Clone.
// A second live handle on either side would break the single-writer
// reasoning the whole protocol rests on.
