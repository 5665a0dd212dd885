//! # System Statistics
//!
//! Process-wide figures recomputed on a timer outside of the hook bodies.
//! Hook bodies read a single snapshot of the threshold per invocation.
//!
//! ## Threshold
//!
//! Every interval the latency criticality of each task that started
//! running is sampled. At the end of the interval the threshold is set
//! midway between the average and the maximum sample, so only the more
//! urgent part of the workload is allowed to spend effort on preemption.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::cpu::CpuStore;

/// Summary of one sampling interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalSummary {
    /// Number of samples
    pub nr_samples: u64,
    /// Average latency criticality
    pub avg_lat_cri: u64,
    /// Maximum latency criticality
    pub max_lat_cri: u64,
    /// Threshold in effect after the interval
    pub thr_lat_cri: u64,
}

/// Process-wide scheduling statistics
#[derive(Debug, Default)]
pub struct SystemStats {
    thr_lat_cri: AtomicU64,
    nr_samples: AtomicU64,
    sum_lat_cri: AtomicU64,
    max_lat_cri: AtomicU64,
    nr_preempt: AtomicU64,
    nr_preempt_lost: AtomicU64,
}

impl SystemStats {
    /// Create statistics with an initial threshold
    pub const fn new(thr_lat_cri: u64) -> Self {
        Self {
            thr_lat_cri: AtomicU64::new(thr_lat_cri),
            nr_samples: AtomicU64::new(0),
            sum_lat_cri: AtomicU64::new(0),
            max_lat_cri: AtomicU64::new(0),
            nr_preempt: AtomicU64::new(0),
            nr_preempt_lost: AtomicU64::new(0),
        }
    }

    /// Current latency-criticality threshold
    #[inline(always)]
    pub fn thr_lat_cri(&self) -> u64 {
        self.thr_lat_cri.load(Ordering::Acquire)
    }

    /// Override the threshold
    pub fn set_thr_lat_cri(&self, thr: u64) {
        self.thr_lat_cri.store(thr, Ordering::Release);
    }

    /// Sample a running task's latency criticality
    ///
    /// The interval sum saturates instead of wrapping.
    #[inline]
    pub fn record_lat_cri(&self, lat_cri: u64) {
        self.nr_samples.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_lat_cri
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |sum| {
                Some(sum.saturating_add(lat_cri))
            });
        self.max_lat_cri.fetch_max(lat_cri, Ordering::Relaxed);
    }

    /// Close the current interval and recompute the threshold
    ///
    /// An interval without samples keeps the previous threshold.
    pub fn recompute(&self) -> IntervalSummary {
        let nr_samples = self.nr_samples.swap(0, Ordering::AcqRel);
        let sum = self.sum_lat_cri.swap(0, Ordering::AcqRel);
        let max = self.max_lat_cri.swap(0, Ordering::AcqRel);

        if nr_samples == 0 {
            return IntervalSummary {
                thr_lat_cri: self.thr_lat_cri(),
                ..IntervalSummary::default()
            };
        }

        let avg = sum / nr_samples;
        let max = max.max(avg);
        let thr = avg + (max - avg) / 2;
        self.set_thr_lat_cri(thr);

        log::trace!(
            "sys_stat: samples={} avg_lat_cri={} max_lat_cri={} thr_lat_cri={}",
            nr_samples,
            avg,
            max,
            thr
        );

        IntervalSummary {
            nr_samples,
            avg_lat_cri: avg,
            max_lat_cri: max,
            thr_lat_cri: thr,
        }
    }

    /// Sum the per-CPU preemption counters
    pub fn collect_preempt_counters(&self, cpus: &dyn CpuStore) {
        let mut won = 0;
        let mut lost = 0;
        for cpu in 0..cpus.nr_cpu_ids() {
            if let Some(cpuc) = cpus.lookup_cpu(cpu as u32) {
                won += cpuc.nr_preempt();
                lost += cpuc.nr_preempt_lost();
            }
        }
        self.nr_preempt.store(won, Ordering::Relaxed);
        self.nr_preempt_lost.store(lost, Ordering::Relaxed);
    }

    /// Total preemptions won, as of the last collection
    pub fn nr_preempt(&self) -> u64 {
        self.nr_preempt.load(Ordering::Relaxed)
    }

    /// Total preemption claims lost, as of the last collection
    pub fn nr_preempt_lost(&self) -> u64 {
        self.nr_preempt_lost.load(Ordering::Relaxed)
    }
}
