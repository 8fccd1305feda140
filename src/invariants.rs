//! Debug assertion macros for the queue protocol invariants.
//!
//! Only active in debug builds, so there is zero overhead on the
//! release hot path.

/// Assert that a slot index is within the region bounds.
///
/// Catches chain corruption early: a chain entry that escaped the
/// `[0, slots)` permutation would otherwise turn into an out-of-bounds
/// payload access.
macro_rules! debug_assert_slot {
    ($slot:expr, $slots:expr) => {
        debug_assert!(
            $slot < $slots,
            "slot {} out of bounds for a {}-slot region",
            $slot,
            $slots
        )
    };
}

/// Assert that a put handed out a slot other than the one it published.
///
/// The published slot is reachable by the consumer from this point on;
/// handing it back to the writer would let both sides touch it at once.
macro_rules! debug_assert_fresh_current {
    ($published:expr, $fresh:expr) => {
        debug_assert!(
            $published != $fresh,
            "put handed back the slot it just published ({})",
            $published
        )
    };
}

/// Assert that two privately owned slots are distinct.
///
/// `current`, `overrun` and the consumer-held slot must always be
/// pairwise distinct indices.
macro_rules! debug_assert_distinct {
    ($a:expr, $b:expr) => {
        debug_assert!(
            $a != $b,
            "two privately owned slots collided on index {}",
            $a
        )
    };
}

pub(crate) use debug_assert_distinct;
pub(crate) use debug_assert_fresh_current;
pub(crate) use debug_assert_slot;
