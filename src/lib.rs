//! freshq — a lock-free SPSC message queue with producer-wins overrun.
//!
//! Built for lossy real-time streams (sensor samples, frames,
//! telemetry): the producer never blocks and never fails, and when the
//! consumer falls behind, the oldest unread data is discarded in favor
//! of fresh data. The whole queue lives in one flat, pre-allocated
//! region — `[head][tail][chain[N]]` plus a payload array — so it can
//! be placed in a shared-memory segment and driven from two threads or
//! two processes.
//!
//! # Key properties
//!
//! - Wait-free `force_put`: always returns a writable slot, discarding
//!   the oldest unread message when full
//! - The consumer's outstanding message reference stays valid across
//!   overruns (the producer rotates the held slot out of circulation
//!   instead of reusing it)
//! - FIFO `get_tail` and skip-to-newest `get_head` read modes
//! - A single atomic word carries the reader boundary *and* the
//!   consumer's grip on it, so the two sides contend on one CAS target
//!
//! # Example
//!
//! ```
//! use freshq::MsgQueue;
//!
//! let queue = MsgQueue::<u64>::with_capacity(5).unwrap();
//! let mut producer = queue.producer().unwrap();
//! let mut consumer = queue.consumer().unwrap();
//!
//! // A put stages a slot for writing; the staged value becomes visible
//! // on the *next* put.
//! producer.put(1);
//! producer.put(2); // publishes 1
//! assert_eq!(*consumer.get_tail().unwrap(), 1);
//!
//! // `send` stages and publishes in one step.
//! producer.send(3);
//! assert_eq!(*consumer.get_head().unwrap(), 3);
//! ```

mod config;
mod consumer;
mod index;
mod invariants;
mod metrics;
mod producer;
mod queue;
mod region;

pub use config::{Config, MIN_SLOTS, MSG_ALIGN};
pub use consumer::{Consumer, MsgRef, ReadStatus};
pub use index::{Index, INDEX_END};
pub use metrics::MetricsSnapshot;
pub use producer::Producer;
pub use queue::{MsgQueue, QueueError};
pub use region::SharedRegion;
