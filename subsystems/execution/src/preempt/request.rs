//! # Yield Requests
//!
//! A victim is never interrupted with a cross-CPU kick: the cost of an IPI
//! varies a lot between architectures and processor generations. Instead the
//! running task's slice is cut to the minimum so it yields at its next
//! scheduling point.
//!
//! Two CPUs can pick the same victim at the same time. The race is settled
//! on the victim's `stopping_tm_est_ns`: the requester that swaps it to `0`
//! owns the preemption, everyone else backs off. A `0` also keeps the victim
//! out of later searches, since no task finishes before time zero.

use core::sync::atomic::Ordering;

use crate::cpu::CpuContext;

/// Outcome of a yield request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldResult {
    /// This requester claimed the victim and cut its slice
    Claimed,
    /// The victim was claimed before this request looked at it
    AlreadyClaimed,
    /// Another requester claimed the victim first
    RaceLost,
    /// Nothing is running on the victim
    NoRunningTask,
}

impl YieldResult {
    /// Check if this requester won the victim
    #[inline(always)]
    pub fn is_claimed(self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Ask the task running on `victim` to give up its CPU
///
/// `yield_slice_ns` must be non-zero; `PreemptConfig::validate` rejects a
/// zero yield slice.
pub fn ask_cpu_yield(victim: &CpuContext, yield_slice_ns: u64) -> YieldResult {
    debug_assert!(yield_slice_ns != 0);

    if victim.curr_task().is_none() {
        return YieldResult::NoRunningTask;
    }

    let old = victim.stopping_tm_est_ns.load(Ordering::Acquire);
    if old == 0 {
        return YieldResult::AlreadyClaimed;
    }

    match victim.stopping_tm_est_ns.compare_exchange(
        old,
        0,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            victim.set_curr_slice(yield_slice_ns);
            YieldResult::Claimed
        },
        Err(_) => YieldResult::RaceLost,
    }
}
