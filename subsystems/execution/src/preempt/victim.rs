//! # Victim Selection
//!
//! Preemption is treated as a load-balancing problem: ideally the N most
//! latency-critical tasks always occupy the N CPUs, so finding a victim is
//! finding the CPU running the least critical task. Rather than scanning
//! the whole domain, the search uses the "power of two random choices":
//! collect two qualifying CPUs in random order and keep the better one.
//!
//! Members are drawn without replacement, every remaining member equally
//! likely at each step, so CPUs searching at the same time tend to pick
//! different victims. Each candidate is visited at most once and the search
//! stops at the second qualifying CPU.

use arrayvec::ArrayVec;
use lavd_hal::{CpuId, CpuMask, Xorshift64};

use super::{can_a_preempt_b, PreemptionInfo};
use crate::cpu::{CpuContext, CpuStore};
use crate::error::{PreemptError, PreemptResult};
use crate::task::TaskContext;

/// Number of qualifying CPUs collected before the search stops
pub const NR_CANDIDATES: usize = 2;

/// Invocation context of a victim search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchContext {
    /// CPU running the search; never chosen as its own victim
    pub cur_cpu: CpuId,
    /// Current monotonic time
    pub now: u64,
}

type Candidate<'a> = (PreemptionInfo, &'a CpuContext);

#[inline]
fn can_cpu_be_kicked(cpuc: &CpuContext) -> bool {
    cpuc.is_online()
}

/// Snapshot `cpuc` and check whether the task may preempt it
///
/// A CPU running a lock holder is never a candidate.
#[inline]
fn can_task_kick_cpu(prm_task: &PreemptionInfo, cpuc: &CpuContext) -> Option<PreemptionInfo> {
    if cpuc.is_lock_holder() {
        return None;
    }
    let prm_cpu = PreemptionInfo::for_cpu(cpuc);
    can_a_preempt_b(prm_task, &prm_cpu).then_some(prm_cpu)
}

/// Pick the final victim among the collected candidates
///
/// With two candidates the one that wins the comparison rule against the
/// other is chosen. When neither wins, the first one found is kept.
fn choose_victim<'a>(candidates: &[Candidate<'a>]) -> Option<&'a CpuContext> {
    match candidates {
        [(prm_a, cpuc_a), (prm_b, cpuc_b)] => {
            if can_a_preempt_b(prm_a, prm_b) {
                Some(*cpuc_a)
            } else if can_a_preempt_b(prm_b, prm_a) {
                Some(*cpuc_b)
            } else {
                Some(*cpuc_a)
            }
        },
        [(_, cpuc)] => Some(*cpuc),
        _ => None,
    }
}

/// Find a CPU in `cpumask` whose running task `task` should displace
///
/// Returns `Ok(None)` when no CPU qualifies. A CPU in the mask without a
/// record is a fatal inconsistency.
pub fn find_victim_cpu<'a>(
    cpus: &'a dyn CpuStore,
    cpumask: &CpuMask,
    task: &TaskContext,
    ctx: SearchContext,
    rng: &mut Xorshift64,
) -> PreemptResult<Option<&'a CpuContext>> {
    if cpumask.is_empty() {
        return Ok(None);
    }

    let prm_task = PreemptionInfo::for_task(task, ctx.cur_cpu, ctx.now);
    let nr_cpu_ids = cpus.nr_cpu_ids();

    let mut candidates: ArrayVec<Candidate<'a>, NR_CANDIDATES> = ArrayVec::new();
    for cpu in cpumask.shuffle(rng) {
        if cpu as usize >= nr_cpu_ids || cpu == ctx.cur_cpu {
            continue;
        }

        let cpuc = cpus.lookup_cpu(cpu).ok_or(PreemptError::CpuLookup(cpu))?;
        if !can_cpu_be_kicked(cpuc) {
            continue;
        }

        if let Some(prm_cpu) = can_task_kick_cpu(&prm_task, cpuc) {
            candidates.push((prm_cpu, cpuc));
            if candidates.is_full() {
                break;
            }
        }
    }

    log::trace!(
        "cpu {}: victim search found {} candidate(s)",
        ctx.cur_cpu,
        candidates.len()
    );
    Ok(choose_victim(&candidates))
}
