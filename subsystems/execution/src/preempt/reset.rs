//! Preemption-state reset on CPU occupancy changes.

use core::sync::atomic::Ordering;

use lavd_hal::SLICE_INF;

use crate::cpu::CpuContext;

/// Republish a CPU's preemptability
///
/// - `released`: a higher-priority scheduler took the CPU. Maximum
///   criticality and a zero stopping time make it impossible to preempt.
/// - otherwise the CPU went idle. Minimum criticality and an infinitely
///   distant stopping time make it the easiest possible victim.
pub fn reset_cpu_preemption_info(cpuc: &CpuContext, released: bool) {
    if released {
        cpuc.lat_cri.store(SLICE_INF, Ordering::Release);
        cpuc.stopping_tm_est_ns.store(0, Ordering::Release);
    } else {
        cpuc.lat_cri.store(0, Ordering::Release);
        cpuc.stopping_tm_est_ns.store(SLICE_INF, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskContext;

    fn cpu_running(lat_cri: u64, stopping: u64) -> CpuContext {
        let cpuc = CpuContext::new(0, 1);
        cpuc.on_running(1, &TaskContext::new(lat_cri, stopping), 1_000, 0);
        cpuc
    }

    #[test]
    fn test_idle_transition() {
        let cpuc = cpu_running(7, 900);
        reset_cpu_preemption_info(&cpuc, false);
        assert_eq!(cpuc.lat_cri(), 0);
        assert_eq!(cpuc.stopping_tm_est_ns(), SLICE_INF);
    }

    #[test]
    fn test_release_transition() {
        let cpuc = cpu_running(3, 1500);
        reset_cpu_preemption_info(&cpuc, true);
        assert_eq!(cpuc.lat_cri(), SLICE_INF);
        assert_eq!(cpuc.stopping_tm_est_ns(), 0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        for released in [false, true] {
            let cpuc = cpu_running(4, 400);
            reset_cpu_preemption_info(&cpuc, released);
            let first = (cpuc.lat_cri(), cpuc.stopping_tm_est_ns());
            for _ in 0..3 {
                reset_cpu_preemption_info(&cpuc, released);
                assert_eq!((cpuc.lat_cri(), cpuc.stopping_tm_est_ns()), first);
            }
        }
    }
}
