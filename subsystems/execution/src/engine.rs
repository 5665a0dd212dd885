//! # Preemption Engine
//!
//! Hook entry points called by the dispatch and idle/release paths.
//!
//! ## Hooks
//!
//! - [`PreemptEngine::try_preempt_for`]: a runnable task could not be placed
//!   on an idle CPU
//! - [`PreemptEngine::on_cpu_state_change`]: a CPU went idle or was taken by
//!   a higher-priority scheduler
//!
//! Each hook takes an explicit [`HookContext`] (calling CPU and current
//! time) instead of reading ambient per-CPU state, so a loader, a trace
//! replayer and a unit test all drive the engine the same way.
//!
//! ## Failure Model
//!
//! A missing record that the engine relies on means the bookkeeping is
//! corrupt. The first such error halts the policy; every later hook call is
//! refused with [`PreemptError::Halted`] until the loader restarts it.

use core::sync::atomic::{AtomicU32, Ordering};

use lavd_hal::{Clock, CpuId};
use spin::Once;

use crate::config::PreemptConfig;
use crate::cpu::CpuStore;
use crate::domain::DomainRegistry;
use crate::error::{ConfigError, PreemptError, PreemptResult};
use crate::preempt::{
    ask_cpu_yield, find_victim_cpu, reset_cpu_preemption_info, should_try_preempt,
    FilterVerdict, SearchContext, YieldResult,
};
use crate::stats::SystemStats;
use crate::task::{RecordClassifier, TaskClassifier, TaskId, TaskStore};

static RECORD_CLASSIFIER: RecordClassifier = RecordClassifier;

// =============================================================================
// Hook Context
// =============================================================================

/// Invocation context of a hook body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookContext {
    /// CPU the hook runs on
    pub cpu: CpuId,
    /// Monotonic time of the invocation
    pub now: u64,
}

impl HookContext {
    /// Create a hook context
    pub const fn new(cpu: CpuId, now: u64) -> Self {
        Self { cpu, now }
    }

    /// Context for `cpu` stamped with the clock's current time
    pub fn from_clock(cpu: CpuId, clock: &dyn Clock) -> Self {
        Self::new(cpu, clock.now_ns())
    }
}

/// Result of a preemption attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptOutcome {
    /// Preemption is switched off
    Disabled,
    /// The task is classified greedy
    Ineligible,
    /// The task is below the latency-criticality threshold
    NotWorth,
    /// The task's domain mask is not published
    NoDomain,
    /// No CPU qualified as a victim
    NoVictim,
    /// The chosen victim had nothing running
    VictimIdle(CpuId),
    /// Another requester claimed the chosen victim first
    RaceLost(CpuId),
    /// The victim was claimed and will yield at its next scheduling point
    Preempted(CpuId),
}

// =============================================================================
// Policy Exit
// =============================================================================

/// Policy run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PolicyState {
    /// Hooks are serviced
    Running = 0,
    /// A fatal error halted the policy
    Halted = 1,
}

impl From<u32> for PolicyState {
    fn from(value: u32) -> Self {
        match value {
            0 => PolicyState::Running,
            _ => PolicyState::Halted,
        }
    }
}

/// Halt latch and the error that tripped it
#[derive(Debug)]
pub struct PolicyExit {
    state: AtomicU32,
    reason: Once<PreemptError>,
}

impl PolicyExit {
    /// Create a latch in the running state
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(PolicyState::Running as u32),
            reason: Once::new(),
        }
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> PolicyState {
        PolicyState::from(self.state.load(Ordering::Acquire))
    }

    /// Check if the policy halted
    #[inline]
    pub fn is_halted(&self) -> bool {
        self.state() == PolicyState::Halted
    }

    /// Error that halted the policy
    pub fn reason(&self) -> Option<PreemptError> {
        self.reason.get().copied()
    }

    /// Halt the policy; returns `true` for the call that tripped the latch
    pub fn halt(&self, err: PreemptError) -> bool {
        let first = self
            .state
            .compare_exchange(
                PolicyState::Running as u32,
                PolicyState::Halted as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if first {
            self.reason.call_once(|| err);
            log::error!("Preemption policy halted: {}", err);
        }
        first
    }
}

impl Default for PolicyExit {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Latency-critical preemption engine
pub struct PreemptEngine<'a> {
    config: PreemptConfig,
    tasks: &'a dyn TaskStore,
    cpus: &'a dyn CpuStore,
    domains: &'a dyn DomainRegistry,
    classifier: &'a dyn TaskClassifier,
    stats: &'a SystemStats,
    exit: PolicyExit,
}

impl<'a> PreemptEngine<'a> {
    /// Create an engine over the given collaborators
    pub fn new(
        config: PreemptConfig,
        tasks: &'a dyn TaskStore,
        cpus: &'a dyn CpuStore,
        domains: &'a dyn DomainRegistry,
        stats: &'a SystemStats,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            tasks,
            cpus,
            domains,
            classifier: &RECORD_CLASSIFIER,
            stats,
            exit: PolicyExit::new(),
        })
    }

    /// Replace the greedy-task classifier
    pub fn with_classifier(mut self, classifier: &'a dyn TaskClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &PreemptConfig {
        &self.config
    }

    /// Halt latch
    pub fn exit(&self) -> &PolicyExit {
        &self.exit
    }

    fn guard<T>(&self, res: PreemptResult<T>) -> PreemptResult<T> {
        if let Err(err) = &res {
            self.exit.halt(*err);
        }
        res
    }

    /// Try to make room for `pid`, queued on dispatch queue `dsq_id`
    ///
    /// Benign failures are reported as [`PreemptOutcome`] variants. An
    /// `Err` is fatal and has already halted the policy.
    pub fn try_preempt_for(
        &self,
        ctx: HookContext,
        pid: TaskId,
        dsq_id: u64,
    ) -> PreemptResult<PreemptOutcome> {
        if self.exit.is_halted() {
            return Err(PreemptError::Halted);
        }
        let res = self.try_find_and_kick_victim_cpu(ctx, pid, dsq_id);
        self.guard(res)
    }

    fn try_find_and_kick_victim_cpu(
        &self,
        ctx: HookContext,
        pid: TaskId,
        dsq_id: u64,
    ) -> PreemptResult<PreemptOutcome> {
        if !self.config.enabled {
            return Ok(PreemptOutcome::Disabled);
        }

        let task = self
            .tasks
            .lookup_task(pid)
            .ok_or(PreemptError::TaskLookup(pid))?;

        match should_try_preempt(self.classifier, self.stats, pid, &task) {
            FilterVerdict::Pass => {},
            FilterVerdict::Ineligible => return Ok(PreemptOutcome::Ineligible),
            FilterVerdict::NotWorth => return Ok(PreemptOutcome::NotWorth),
        }

        let cpuc_cur = self
            .cpus
            .lookup_cpu(ctx.cpu)
            .ok_or(PreemptError::CpuLookup(ctx.cpu))?;

        let Some(cd_cpumask) = self.domains.domain_cpumask(dsq_id) else {
            return Ok(PreemptOutcome::NoDomain);
        };
        if self.domains.domain(dsq_id).is_none() {
            return Err(PreemptError::DomainLookup(dsq_id));
        }

        let cpumask = cd_cpumask.and(&task.affinity);
        let search = SearchContext {
            cur_cpu: ctx.cpu,
            now: ctx.now,
        };

        let mut rng = cpuc_cur.take_prng();
        let victim = find_victim_cpu(self.cpus, &cpumask, &task, search, &mut rng);
        cpuc_cur.put_prng(rng);

        let Some(victim) = victim? else {
            return Ok(PreemptOutcome::NoVictim);
        };
        let victim_cpu = victim.cpu_id();

        let outcome = match ask_cpu_yield(victim, self.config.yield_slice_ns) {
            YieldResult::Claimed => {
                cpuc_cur.count_preempt(true);
                log::debug!("cpu {}: task {} preempts cpu {}", ctx.cpu, pid, victim_cpu);
                PreemptOutcome::Preempted(victim_cpu)
            },
            YieldResult::AlreadyClaimed | YieldResult::RaceLost => {
                cpuc_cur.count_preempt(false);
                log::trace!("cpu {}: lost claim on cpu {}", ctx.cpu, victim_cpu);
                PreemptOutcome::RaceLost(victim_cpu)
            },
            YieldResult::NoRunningTask => PreemptOutcome::VictimIdle(victim_cpu),
        };
        Ok(outcome)
    }

    /// A CPU went idle (`released == false`) or was taken by a
    /// higher-priority scheduler (`released == true`)
    pub fn on_cpu_state_change(&self, cpu: CpuId, released: bool) -> PreemptResult<()> {
        if self.exit.is_halted() {
            return Err(PreemptError::Halted);
        }
        let res = self
            .cpus
            .lookup_cpu(cpu)
            .ok_or(PreemptError::CpuLookup(cpu))
            .map(|cpuc| reset_cpu_preemption_info(cpuc, released));
        self.guard(res)
    }
}

impl core::fmt::Debug for PreemptEngine<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PreemptEngine")
            .field("config", &self.config)
            .field("nr_cpu_ids", &self.cpus.nr_cpu_ids())
            .field("thr_lat_cri", &self.stats.thr_lat_cri())
            .field("state", &self.exit.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use lavd_hal::{CpuMask, ManualClock, SLICE_INF, SLICE_MIN};

    use super::*;
    use crate::cpu::CpuTable;
    use crate::domain::DomainTable;
    use crate::task::{TaskContext, TaskTable};

    const DSQ: u64 = 0;
    const CUR: CpuId = 3;

    struct World {
        config: PreemptConfig,
        cpus: CpuTable,
        tasks: TaskTable,
        domains: DomainTable,
        stats: SystemStats,
    }

    impl World {
        fn new(nr_cpus: usize, domain: &[CpuId]) -> Self {
            let config = PreemptConfig::new(nr_cpus);
            let cpus = CpuTable::new(&config).unwrap();
            cpus.online_all();
            let mut domains = DomainTable::new(nr_cpus);
            domains
                .register(DSQ, CpuMask::from_cpus(domain.iter().copied()))
                .unwrap();
            Self {
                config,
                cpus,
                tasks: TaskTable::new(),
                domains,
                stats: SystemStats::new(0),
            }
        }

        /// X(5, 1000), Y(2, 500), Z lock holder
        fn scenario() -> Self {
            let world = Self::new(4, &[0, 1, 2]);
            world.run(0, 5, 1000);
            world.run(1, 2, 500);
            world.run(2, 0, 10_000);
            world.cpu(2).set_lock_holder(true);
            world
        }

        fn engine(&self) -> PreemptEngine<'_> {
            PreemptEngine::new(
                self.config,
                &self.tasks,
                &self.cpus,
                &self.domains,
                &self.stats,
            )
            .unwrap()
        }

        fn cpu(&self, cpu: CpuId) -> &crate::cpu::CpuContext {
            self.cpus.lookup_cpu(cpu).unwrap()
        }

        fn run(&self, cpu: CpuId, lat_cri: u64, stopping: u64) {
            let pid = 1000 + cpu;
            let task = TaskContext::new(lat_cri, stopping);
            self.tasks.insert(pid, task);
            self.cpu(cpu).on_running(pid, &task, 20_000_000, 0);
        }
    }

    #[test]
    fn test_urgent_task_preempts_x() {
        let world = World::scenario();
        world.tasks.insert(1, TaskContext::new(10, 800));
        let engine = world.engine();

        let outcome = engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ);
        assert_eq!(outcome, Ok(PreemptOutcome::Preempted(0)));
        assert_eq!(world.cpu(0).stopping_tm_est_ns(), 0);
        assert_eq!(world.cpu(0).curr_slice_ns(), SLICE_MIN);
        assert_eq!(world.cpu(CUR).nr_preempt(), 1);

        // Y and Z are untouched
        assert_eq!(world.cpu(1).stopping_tm_est_ns(), 500);
        assert_eq!(world.cpu(2).curr_slice_ns(), 20_000_000);

        world.stats.collect_preempt_counters(&world.cpus);
        assert_eq!(world.stats.nr_preempt(), 1);
    }

    #[test]
    fn test_clock_drives_the_estimate() {
        let world = World::scenario();
        world.tasks.insert(1, TaskContext::new(10, 800));
        let engine = world.engine();
        let clock = ManualClock::new(0);

        // at t=300 the task would finish at 1100, after X does
        clock.advance(300);
        assert_eq!(
            engine.try_preempt_for(HookContext::from_clock(CUR, &clock), 1, DSQ),
            Ok(PreemptOutcome::NoVictim)
        );

        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 100), 1, DSQ),
            Ok(PreemptOutcome::Preempted(0))
        );
    }

    #[test]
    fn test_claimed_victim_is_not_chosen_again() {
        let world = World::scenario();
        world.tasks.insert(1, TaskContext::new(10, 800));
        world.tasks.insert(2, TaskContext::new(10, 800));
        let engine = world.engine();

        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ),
            Ok(PreemptOutcome::Preempted(0))
        );
        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 2, DSQ),
            Ok(PreemptOutcome::NoVictim)
        );
    }

    #[test]
    fn test_weak_task_finds_no_victim() {
        let world = World::scenario();
        world.tasks.insert(1, TaskContext::new(3, 2000));
        let engine = world.engine();

        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ),
            Ok(PreemptOutcome::NoVictim)
        );
        assert_eq!(world.cpu(0).stopping_tm_est_ns(), 1000);
    }

    #[test]
    fn test_gates() {
        let world = World::scenario();
        world.tasks.insert(1, TaskContext::new(10, 800).with_greedy(true));
        world.tasks.insert(2, TaskContext::new(10, 800));
        world.stats.set_thr_lat_cri(11);
        let engine = world.engine();
        let ctx = HookContext::new(CUR, 0);

        assert_eq!(engine.try_preempt_for(ctx, 1, DSQ), Ok(PreemptOutcome::Ineligible));
        assert_eq!(engine.try_preempt_for(ctx, 2, DSQ), Ok(PreemptOutcome::NotWorth));

        world.stats.set_thr_lat_cri(10);
        assert_eq!(engine.try_preempt_for(ctx, 2, DSQ), Ok(PreemptOutcome::Preempted(0)));
    }

    #[test]
    fn test_disabled_engine_does_nothing() {
        let mut world = World::scenario();
        world.config.enabled = false;
        world.tasks.insert(1, TaskContext::new(10, 800));
        let engine = world.engine();

        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ),
            Ok(PreemptOutcome::Disabled)
        );
        assert_eq!(world.cpu(0).stopping_tm_est_ns(), 1000);
    }

    #[test]
    fn test_affinity_narrows_the_domain() {
        let world = World::scenario();
        world
            .tasks
            .insert(1, TaskContext::new(10, 800).with_affinity(CpuMask::from_cpus([1, 2, 3])));
        let engine = world.engine();

        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ),
            Ok(PreemptOutcome::NoVictim)
        );
    }

    #[test]
    fn test_unpublished_domain_is_benign() {
        let mut world = World::scenario();
        world.domains.unpublish_cpumask(DSQ);
        world.tasks.insert(1, TaskContext::new(10, 800));
        let engine = world.engine();

        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ),
            Ok(PreemptOutcome::NoDomain)
        );
        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, 42),
            Ok(PreemptOutcome::NoDomain)
        );
        assert!(!engine.exit().is_halted());
    }

    #[test]
    fn test_missing_domain_record_halts() {
        let mut world = World::scenario();
        world.domains.drop_record(DSQ);
        world.tasks.insert(1, TaskContext::new(10, 800));
        let engine = world.engine();
        let ctx = HookContext::new(CUR, 0);

        assert_eq!(
            engine.try_preempt_for(ctx, 1, DSQ),
            Err(PreemptError::DomainLookup(DSQ))
        );
        assert!(engine.exit().is_halted());
        assert_eq!(engine.exit().reason(), Some(PreemptError::DomainLookup(DSQ)));

        // later hooks are refused and the first reason is kept
        assert_eq!(engine.try_preempt_for(ctx, 1, DSQ), Err(PreemptError::Halted));
        assert_eq!(engine.on_cpu_state_change(0, false), Err(PreemptError::Halted));
        assert_eq!(engine.exit().reason(), Some(PreemptError::DomainLookup(DSQ)));
    }

    #[test]
    fn test_unknown_task_or_cpu_halts() {
        let world = World::scenario();
        let engine = world.engine();
        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 77, DSQ),
            Err(PreemptError::TaskLookup(77))
        );

        let world = World::scenario();
        world.tasks.insert(1, TaskContext::new(10, 800));
        let engine = world.engine();
        assert_eq!(
            engine.try_preempt_for(HookContext::new(9, 0), 1, DSQ),
            Err(PreemptError::CpuLookup(9))
        );
        assert_eq!(engine.exit().state(), PolicyState::Halted);
    }

    #[test]
    fn test_cpu_state_change() {
        let world = World::new(4, &[0, 1]);
        world.run(0, 7, 900);
        world.run(1, 3, 1500);
        let engine = world.engine();

        engine.on_cpu_state_change(0, false).unwrap();
        assert_eq!(world.cpu(0).lat_cri(), 0);
        assert_eq!(world.cpu(0).stopping_tm_est_ns(), SLICE_INF);

        engine.on_cpu_state_change(1, true).unwrap();
        assert_eq!(world.cpu(1).lat_cri(), SLICE_INF);
        assert_eq!(world.cpu(1).stopping_tm_est_ns(), 0);

        assert_eq!(
            engine.on_cpu_state_change(8, true),
            Err(PreemptError::CpuLookup(8))
        );
    }

    #[test]
    fn test_released_cpu_is_never_a_victim() {
        let world = World::new(4, &[0]);
        world.run(0, 1, 1_000_000);
        world.tasks.insert(1, TaskContext::new(u64::MAX - 1, 0));
        let engine = world.engine();

        engine.on_cpu_state_change(0, true).unwrap();
        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ),
            Ok(PreemptOutcome::NoVictim)
        );
    }

    #[test]
    fn test_idle_victim_is_reported() {
        let world = World::new(4, &[0]);
        world.run(0, 5, 1000);
        world.tasks.insert(1, TaskContext::new(10, 800));
        let engine = world.engine();

        world.cpu(0).on_stopping();
        engine.on_cpu_state_change(0, false).unwrap();
        assert_eq!(
            engine.try_preempt_for(HookContext::new(CUR, 0), 1, DSQ),
            Ok(PreemptOutcome::VictimIdle(0))
        );
        assert_eq!(world.cpu(0).stopping_tm_est_ns(), SLICE_INF);
    }

    #[test]
    fn test_concurrent_requesters_share_one_victim() {
        const REQUESTERS: usize = 8;

        let world = World::new(REQUESTERS + 1, &[0]);
        world.run(0, 1, 1_000_000);
        for pid in 1..=REQUESTERS as TaskId {
            world.tasks.insert(pid, TaskContext::new(10, 100));
        }
        let engine = world.engine();
        let barrier = Barrier::new(REQUESTERS);

        let outcomes: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (1..=REQUESTERS as CpuId)
                .map(|cpu| {
                    let engine = &engine;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        engine.try_preempt_for(HookContext::new(cpu, 0), cpu, DSQ)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(PreemptOutcome::Preempted(0))))
            .count();
        assert_eq!(winners, 1);
        assert!(outcomes.iter().all(|o| matches!(
            o,
            Ok(PreemptOutcome::Preempted(0))
                | Ok(PreemptOutcome::RaceLost(0))
                | Ok(PreemptOutcome::NoVictim)
        )));

        world.stats.collect_preempt_counters(&world.cpus);
        assert_eq!(world.stats.nr_preempt(), 1);
    }
}
