//! # Time
//!
//! Monotonic clock seam and time-slice sentinels.
//!
//! Slices follow the hook environment's conventions: a slice of `0` means
//! "assign the default slice", so the shortest real budget is [`SLICE_MIN`],
//! and [`SLICE_INF`] doubles as the "never" timestamp.

use core::sync::atomic::{AtomicU64, Ordering};

/// Infinite slice; also used as an infinitely distant timestamp
pub const SLICE_INF: u64 = u64::MAX;

/// Smallest non-default slice, in nanoseconds
pub const SLICE_MIN: u64 = 1;

/// Monotonic nanosecond clock
pub trait Clock {
    /// Current monotonic time in nanoseconds
    fn now_ns(&self) -> u64;
}

/// Clock advanced explicitly by its owner
///
/// Used by simulations and by the loader when replaying recorded traces.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_ns`
    pub const fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    /// Move the clock forward by `delta_ns`
    pub fn advance(&self, delta_ns: u64) {
        self.now.fetch_add(delta_ns, Ordering::AcqRel);
    }

    /// Set the clock; the value never moves backwards
    pub fn set(&self, now_ns: u64) {
        self.now.fetch_max(now_ns, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
