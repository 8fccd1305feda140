//! Property-based tests over random operation sequences.
//!
//! Driven from one thread, the queue is a deterministic state machine,
//! so a tiny reference model (what was staged, what was published last)
//! pins down the exact expected behavior of every operation.

use freshq::{MsgQueue, ReadStatus};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    ForcePut,
    TryPut,
    GetTail,
    GetHead,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::ForcePut),
        Just(Op::TryPut),
        Just(Op::GetTail),
        Just(Op::GetHead),
    ]
}

proptest! {
    /// The consumer's counter stream is strictly increasing across
    /// fresh deliveries, repeats re-deliver the same counter, and
    /// `get_head` always lands on the most recent publish.
    #[test]
    fn counters_behave_under_any_op_sequence(
        slots in 3u32..16,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let queue = MsgQueue::<u64>::with_capacity(slots).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        let mut counter = 0u64;
        let mut staged: Option<u64> = None;
        let mut published_last: Option<u64> = None;
        let mut delivered_last: Option<u64> = None;

        for op in ops {
            match op {
                Op::ForcePut => {
                    producer.put(counter);
                    if staged.is_some() {
                        published_last = staged;
                    }
                    staged = Some(counter);
                    counter += 1;
                }
                Op::TryPut => {
                    if let Some(slot) = producer.try_put() {
                        slot.write(counter);
                        if staged.is_some() {
                            published_last = staged;
                        }
                        staged = Some(counter);
                        counter += 1;
                    }
                }
                Op::GetTail => {
                    match consumer.get_tail() {
                        None => prop_assert!(published_last.is_none()),
                        Some(msg) => {
                            let value = *msg;
                            match msg.status() {
                                ReadStatus::Unchanged => {
                                    prop_assert_eq!(Some(value), delivered_last);
                                }
                                ReadStatus::Fresh | ReadStatus::Skipped => {
                                    if let Some(last) = delivered_last {
                                        prop_assert!(
                                            value > last,
                                            "delivered {} after {}", value, last
                                        );
                                    }
                                }
                            }
                            prop_assert!(Some(value) <= published_last);
                            delivered_last = Some(value);
                        }
                    }
                }
                Op::GetHead => {
                    match consumer.get_head() {
                        None => prop_assert!(published_last.is_none()),
                        Some(msg) => {
                            // single-threaded: the head is exactly the
                            // last published message
                            prop_assert_eq!(Some(*msg), published_last);
                            delivered_last = Some(*msg);
                        }
                    }
                }
            }

            // the producer never stages the slot the consumer holds
            if let (Some(p), Some(c)) =
                (producer.current_index(), consumer.current_index())
            {
                prop_assert_ne!(p, c);
            }
            if let (Some(o), Some(c)) =
                (producer.overrun_index(), consumer.current_index())
            {
                prop_assert_ne!(o, c);
            }
        }
    }

    /// With only `try_put` producing, nothing is ever discarded: fresh
    /// deliveries are exactly consecutive and never tagged as skips.
    #[test]
    fn try_put_is_lossless(
        slots in 3u32..10,
        ops in prop::collection::vec(prop::bool::ANY, 1..200),
    ) {
        let queue = MsgQueue::<u64>::with_capacity(slots).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        let mut counter = 0u64;
        let mut expected = 0u64;

        for put_op in ops {
            if put_op {
                if let Some(slot) = producer.try_put() {
                    slot.write(counter);
                    counter += 1;
                }
            } else if let Some(msg) = consumer.get_tail() {
                prop_assert_ne!(msg.status(), ReadStatus::Skipped);
                if msg.status() == ReadStatus::Fresh {
                    prop_assert_eq!(*msg, expected);
                    expected += 1;
                }
            }
        }
    }

    /// A held message is never written under the reader, no matter what
    /// the producer does next.
    #[test]
    fn held_message_is_stable(
        slots in 3u32..10,
        churn in 1u32..32,
    ) {
        let queue = MsgQueue::<u64>::with_capacity(slots).unwrap();
        let mut producer = queue.producer().unwrap();
        let mut consumer = queue.consumer().unwrap();

        // publish a couple of messages, then hold one
        producer.put(1);
        producer.put(2);
        let msg = consumer.get_tail().unwrap();
        let held = *msg;

        for i in 0..churn {
            producer.put(u64::from(i) + 3);
            prop_assert_eq!(*msg, held);
        }
    }
}
