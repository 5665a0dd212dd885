//! # Per-CPU Records
//!
//! One record per possible CPU. Every field is an atomic so that any CPU can
//! read any other CPU's record from inside a hook body without locking.
//!
//! ## Ownership
//!
//! | Field                | Writer                                        |
//! |----------------------|-----------------------------------------------|
//! | `lat_cri`            | the CPU's own scheduling points               |
//! | `stopping_tm_est_ns` | the CPU's own scheduling points + yield claims|
//! | `flags`              | hotplug and lock-tracking bookkeeping         |
//! | running slot         | the CPU's own scheduling points + yield claims|
//! | counters             | the CPU itself                                |
//!
//! `stopping_tm_est_ns` is the only field with several writers; remote
//! writers touch it exclusively through a compare-and-swap to `0`.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use lavd_hal::{CpuId, Xorshift64, CACHE_LINE_SIZE, SLICE_INF};
use static_assertions::{assert_impl_all, const_assert_eq};

use crate::config::PreemptConfig;
use crate::error::ConfigError;
use crate::task::{TaskContext, TaskId};

/// Running-slot value meaning "no task on this CPU"
const NO_TASK: u64 = u64::MAX;

bitflags::bitflags! {
    /// Per-CPU state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFlags: u32 {
        /// CPU is online
        const ONLINE = 1 << 0;
        /// Running task holds a contended lock
        const LOCK_HOLDER = 1 << 1;
    }
}

// ============================================================================
// CPU CONTEXT
// ============================================================================

/// Scheduling state of one CPU
#[repr(C, align(64))]
#[derive(Debug)]
pub struct CpuContext {
    cpu_id: CpuId,
    flags: AtomicU32,
    /// Latency criticality of the running task
    pub(crate) lat_cri: AtomicU64,
    /// Estimated time the running task gives up the CPU; `0` once claimed
    pub(crate) stopping_tm_est_ns: AtomicU64,
    curr_task: AtomicU64,
    curr_slice_ns: AtomicU64,
    prng: AtomicU64,
    nr_preempt: AtomicU64,
    nr_preempt_lost: AtomicU64,
}

const_assert_eq!(core::mem::align_of::<CpuContext>(), CACHE_LINE_SIZE);
assert_impl_all!(CpuContext: Send, Sync);

impl CpuContext {
    /// Create an idle, offline CPU record
    pub fn new(cpu_id: CpuId, prng_seed: u64) -> Self {
        Self {
            cpu_id,
            flags: AtomicU32::new(0),
            lat_cri: AtomicU64::new(0),
            stopping_tm_est_ns: AtomicU64::new(SLICE_INF),
            curr_task: AtomicU64::new(NO_TASK),
            curr_slice_ns: AtomicU64::new(0),
            prng: AtomicU64::new(Xorshift64::for_cpu(prng_seed, cpu_id).state()),
            nr_preempt: AtomicU64::new(0),
            nr_preempt_lost: AtomicU64::new(0),
        }
    }

    /// CPU id
    #[inline(always)]
    pub fn cpu_id(&self) -> CpuId {
        self.cpu_id
    }

    /// Latency criticality of the running task
    #[inline(always)]
    pub fn lat_cri(&self) -> u64 {
        self.lat_cri.load(Ordering::Acquire)
    }

    /// Estimated stopping time of the running task
    #[inline(always)]
    pub fn stopping_tm_est_ns(&self) -> u64 {
        self.stopping_tm_est_ns.load(Ordering::Acquire)
    }

    /// Current flags
    #[inline]
    pub fn flags(&self) -> CpuFlags {
        CpuFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Check if the CPU is online
    #[inline]
    pub fn is_online(&self) -> bool {
        self.flags().contains(CpuFlags::ONLINE)
    }

    /// Check if the running task holds a contended lock
    #[inline]
    pub fn is_lock_holder(&self) -> bool {
        self.flags().contains(CpuFlags::LOCK_HOLDER)
    }

    fn set_flag(&self, flag: CpuFlags, on: bool) {
        if on {
            self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
        }
    }

    /// Mark the CPU online or offline
    pub fn set_online(&self, online: bool) {
        self.set_flag(CpuFlags::ONLINE, online);
    }

    /// Mark whether the running task holds a contended lock
    pub fn set_lock_holder(&self, holder: bool) {
        self.set_flag(CpuFlags::LOCK_HOLDER, holder);
    }

    /// A task starts running on this CPU at `now` with `slice_ns` budget
    pub fn on_running(&self, pid: TaskId, task: &TaskContext, slice_ns: u64, now: u64) {
        self.curr_slice_ns.store(slice_ns, Ordering::Release);
        self.curr_task.store(pid as u64, Ordering::Release);
        self.lat_cri.store(task.lat_cri, Ordering::Release);
        self.stopping_tm_est_ns
            .store(task.est_stopping_time(now), Ordering::Release);
    }

    /// The running task left this CPU
    pub fn on_stopping(&self) {
        self.curr_task.store(NO_TASK, Ordering::Release);
        self.curr_slice_ns.store(0, Ordering::Release);
    }

    /// Task currently running on this CPU
    #[inline]
    pub fn curr_task(&self) -> Option<TaskId> {
        match self.curr_task.load(Ordering::Acquire) {
            NO_TASK => None,
            pid => Some(pid as TaskId),
        }
    }

    /// Remaining slice of the running task
    #[inline]
    pub fn curr_slice_ns(&self) -> u64 {
        self.curr_slice_ns.load(Ordering::Acquire)
    }

    /// Overwrite the running task's remaining slice
    #[inline]
    pub(crate) fn set_curr_slice(&self, slice_ns: u64) {
        self.curr_slice_ns.store(slice_ns, Ordering::Release);
    }

    /// Take this CPU's random stream
    ///
    /// Only the owning CPU calls this, so load/store is enough.
    #[inline]
    pub(crate) fn take_prng(&self) -> Xorshift64 {
        Xorshift64::new(self.prng.load(Ordering::Relaxed))
    }

    /// Store this CPU's random stream back
    #[inline]
    pub(crate) fn put_prng(&self, rng: Xorshift64) {
        self.prng.store(rng.state(), Ordering::Relaxed);
    }

    /// Preemptions this CPU requested and won
    #[inline]
    pub fn nr_preempt(&self) -> u64 {
        self.nr_preempt.load(Ordering::Relaxed)
    }

    /// Preemptions this CPU requested but lost to another requester
    #[inline]
    pub fn nr_preempt_lost(&self) -> u64 {
        self.nr_preempt_lost.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn count_preempt(&self, won: bool) {
        if won {
            self.nr_preempt.fetch_add(1, Ordering::Relaxed);
        } else {
            self.nr_preempt_lost.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// CPU STORE
// ============================================================================

/// Keyed lookup of CPU records
pub trait CpuStore: Send + Sync {
    /// Look up a CPU; `None` means the CPU is unknown
    fn lookup_cpu(&self, cpu: CpuId) -> Option<&CpuContext>;

    /// Number of possible CPU ids
    fn nr_cpu_ids(&self) -> usize;
}

/// Fixed table of CPU records, built once before the policy attaches
#[derive(Debug)]
pub struct CpuTable {
    cpus: Box<[CpuContext]>,
}

impl CpuTable {
    /// Build one record per configured CPU
    pub fn new(config: &PreemptConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cpus: Vec<CpuContext> = (0..config.nr_cpu_ids)
            .map(|cpu| CpuContext::new(cpu as CpuId, config.prng_seed))
            .collect();
        Ok(Self {
            cpus: cpus.into_boxed_slice(),
        })
    }

    /// Bring every CPU online
    pub fn online_all(&self) {
        for cpuc in self.cpus.iter() {
            cpuc.set_online(true);
        }
    }

    /// Iterate over every record
    pub fn iter(&self) -> impl Iterator<Item = &CpuContext> {
        self.cpus.iter()
    }
}

impl CpuStore for CpuTable {
    #[inline]
    fn lookup_cpu(&self, cpu: CpuId) -> Option<&CpuContext> {
        self.cpus.get(cpu as usize)
    }

    #[inline]
    fn nr_cpu_ids(&self) -> usize {
        self.cpus.len()
    }
}
