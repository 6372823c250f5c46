//! # Tuning Parameters
//!
//! Values here trade memory or latency for throughput. None of them affect
//! correctness.

/// Number of distinct page addresses a translation map queues for TLB
/// invalidation before the next flush falls back to invalidating the whole
/// address space.
pub const TLB_INVALIDATE_CAPACITY: usize = 64;

const _: () = {
    assert!(TLB_INVALIDATE_CAPACITY > 0);
};
