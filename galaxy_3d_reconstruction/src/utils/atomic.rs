//! Shared views over plain integer storage for order-independent aggregation.

use std::sync::atomic::AtomicU32;

/// Reinterpret an exclusively borrowed `u32` slice as atomics.
///
/// Passes accumulate counts and fixed-point color sums from many rayon
/// workers at once; integer `fetch_add` keeps the totals identical no matter
/// how the work was scheduled.
pub(crate) fn as_atomic_u32(slice: &mut [u32]) -> &[AtomicU32] {
    // SAFETY: AtomicU32 has the same size, alignment and bit validity as u32,
    // and the exclusive borrow guarantees no non-atomic access for the
    // lifetime of the returned view.
    unsafe { &*(slice as *mut [u32] as *const [AtomicU32]) }
}
