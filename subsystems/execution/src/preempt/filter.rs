//! Eligibility and worth gates.
//!
//! Preemption costs a context switch on the victim, so it is only attempted
//! for tasks that are not greedy and whose urgency clears the system-wide
//! threshold. Both gates are pure reads.

use crate::stats::SystemStats;
use crate::task::{TaskClassifier, TaskContext, TaskId};

/// Result of the preemption gates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Both gates passed
    Pass,
    /// The task is classified greedy
    Ineligible,
    /// The task is below the latency-criticality threshold
    NotWorth,
}

impl FilterVerdict {
    /// Check if both gates passed
    #[inline(always)]
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Task is not greedy
#[inline]
pub fn is_eligible(classifier: &dyn TaskClassifier, pid: TaskId, task: &TaskContext) -> bool {
    !classifier.is_greedy(pid, task)
}

/// Task is urgent enough to justify kicking another CPU
#[inline]
pub fn is_worth_kick_other_task(task: &TaskContext, thr_lat_cri: u64) -> bool {
    task.lat_cri >= thr_lat_cri
}

/// Run both gates against one threshold snapshot
pub fn should_try_preempt(
    classifier: &dyn TaskClassifier,
    stats: &SystemStats,
    pid: TaskId,
    task: &TaskContext,
) -> FilterVerdict {
    if !is_eligible(classifier, pid, task) {
        return FilterVerdict::Ineligible;
    }
    if !is_worth_kick_other_task(task, stats.thr_lat_cri()) {
        return FilterVerdict::NotWorth;
    }
    FilterVerdict::Pass
}
