//! # Latency-Critical Preemption
//!
//! When a runnable task finds no idle CPU, it may displace a task that is
//! both less latency-critical and expected to hold its CPU longer.
//!
//! ## Stages
//!
//! - **Filter**: is the task allowed, and urgent enough, to try at all
//! - **Victim selection**: power-of-two-random-choices over the domain
//! - **Yield request**: claim the victim with one compare-and-swap and
//!   shrink its running slice so it yields at the next scheduling point
//! - **Reset**: republish a CPU's preemptability when it goes idle or is
//!   taken by a higher-priority scheduler
//!
//! None of the stages take a lock or allocate.

pub mod filter;
pub mod request;
pub mod reset;
pub mod victim;

pub use filter::{is_eligible, is_worth_kick_other_task, should_try_preempt, FilterVerdict};
pub use request::{ask_cpu_yield, YieldResult};
pub use reset::reset_cpu_preemption_info;
pub use victim::{find_victim_cpu, SearchContext, NR_CANDIDATES};

use lavd_hal::CpuId;

use crate::cpu::CpuContext;
use crate::task::TaskContext;

/// Preemption-relevant snapshot of a task or of a CPU's running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptionInfo {
    /// Estimated time the CPU is given up
    pub stopping_tm_est_ns: u64,
    /// Latency criticality
    pub lat_cri: u64,
    /// CPU the snapshot belongs to
    pub cpu: CpuId,
}

impl PreemptionInfo {
    /// Snapshot of `task` as if it started running on `cpu` at `now`
    #[inline]
    pub fn for_task(task: &TaskContext, cpu: CpuId, now: u64) -> Self {
        Self {
            stopping_tm_est_ns: task.est_stopping_time(now),
            lat_cri: task.lat_cri,
            cpu,
        }
    }

    /// Snapshot of what `cpuc` currently advertises
    #[inline]
    pub fn for_cpu(cpuc: &CpuContext) -> Self {
        Self {
            stopping_tm_est_ns: cpuc.stopping_tm_est_ns(),
            lat_cri: cpuc.lat_cri(),
            cpu: cpuc.cpu_id(),
        }
    }
}

/// Comparison rule: `a` may preempt `b`
///
/// `a` must be strictly more latency-critical and must also finish strictly
/// before `b` is expected to give up its CPU.
#[inline(always)]
pub fn can_a_preempt_b(a: &PreemptionInfo, b: &PreemptionInfo) -> bool {
    a.lat_cri > b.lat_cri && a.stopping_tm_est_ns < b.stopping_tm_est_ns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(lat_cri: u64, stopping: u64) -> PreemptionInfo {
        PreemptionInfo {
            stopping_tm_est_ns: stopping,
            lat_cri,
            cpu: 0,
        }
    }

    #[test]
    fn test_rule_needs_both_dimensions() {
        assert!(can_a_preempt_b(&info(10, 800), &info(5, 1000)));

        // more urgent but finishes later
        assert!(!can_a_preempt_b(&info(10, 800), &info(2, 500)));
        // finishes sooner but less urgent
        assert!(!can_a_preempt_b(&info(1, 100), &info(5, 1000)));
    }

    #[test]
    fn test_rule_is_strict() {
        assert!(!can_a_preempt_b(&info(5, 800), &info(5, 1000)));
        assert!(!can_a_preempt_b(&info(10, 1000), &info(5, 1000)));
        assert!(!can_a_preempt_b(&info(5, 1000), &info(5, 1000)));
    }

    #[test]
    fn test_rule_is_antisymmetric() {
        let a = info(10, 800);
        let b = info(5, 1000);
        assert!(can_a_preempt_b(&a, &b));
        assert!(!can_a_preempt_b(&b, &a));
    }

    #[test]
    fn test_task_snapshot() {
        let task = TaskContext::new(10, 300);
        let prm = PreemptionInfo::for_task(&task, 2, 500);
        assert_eq!(prm, PreemptionInfo {
            stopping_tm_est_ns: 800,
            lat_cri: 10,
            cpu: 2,
        });
    }
}
