//! # LAVD Execution Subsystem
//!
//! Latency-criticality aware preemption for a kernel scheduling-hook
//! environment. When a runnable task cannot be placed on an idle CPU, the
//! engine decides whether displacing a running task is worth it, picks a
//! victim CPU, and asks it to yield without any cross-CPU lock or signal.
//!
//! ## Components
//!
//! - **Task / CPU records**: per-task and per-CPU scheduling state
//! - **Compute domains**: dispatch queue id to CPU mask
//! - **System statistics**: the process-wide latency-criticality threshold
//! - **Preemption**: filter, victim selection, yield request, reset
//! - **Engine**: hook entry points and the fatal-error halt latch
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = PreemptConfig::new(8);
//! let cpus = CpuTable::new(&config)?;
//! let tasks = TaskTable::new();
//! let mut domains = DomainTable::new(8);
//! domains.register(0, CpuMask::first_n(8))?;
//! let stats = SystemStats::new(0);
//!
//! let engine = PreemptEngine::new(config, &tasks, &cpus, &domains, &stats)?;
//! engine.try_preempt_for(HookContext::new(cpu, now), pid, 0)?;
//! engine.on_cpu_state_change(cpu, false)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod cpu;
pub mod domain;
pub mod engine;
pub mod error;
pub mod preempt;
pub mod stats;
pub mod task;

pub use config::PreemptConfig;
pub use cpu::{CpuContext, CpuFlags, CpuStore, CpuTable};
pub use domain::{DomainContext, DomainRegistry, DomainTable};
pub use engine::{HookContext, PolicyExit, PolicyState, PreemptEngine, PreemptOutcome};
pub use error::{ConfigError, PreemptError, PreemptResult};
pub use preempt::{can_a_preempt_b, PreemptionInfo};
pub use stats::{IntervalSummary, SystemStats};
pub use task::{RecordClassifier, TaskClassifier, TaskContext, TaskId, TaskStore, TaskTable};
