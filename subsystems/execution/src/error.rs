//! # Execution Errors
//!
//! Only conditions that indicate corrupted bookkeeping are errors. Losing a
//! claim race, finding no victim, or a domain that is momentarily absent
//! are ordinary outcomes and are reported through
//! [`PreemptOutcome`](crate::PreemptOutcome) instead.

use core::fmt;

use lavd_hal::CpuId;

use crate::task::TaskId;

/// Fatal preemption-engine errors
///
/// Any of these halts the whole policy; see [`PolicyExit`](crate::PolicyExit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptError {
    /// A CPU record that must exist is missing
    CpuLookup(CpuId),
    /// A task record that must exist is missing
    TaskLookup(TaskId),
    /// A domain mask is registered but its domain record is missing
    DomainLookup(u64),
    /// The policy already halted on an earlier fatal error
    Halted,
}

impl fmt::Display for PreemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CpuLookup(cpu) => write!(f, "Failed to lookup cpu_ctx: {}", cpu),
            Self::TaskLookup(pid) => write!(f, "Failed to lookup task_ctx: {}", pid),
            Self::DomainLookup(dsq) => write!(f, "Failed to lookup cpdom_ctx: {}", dsq),
            Self::Halted => write!(f, "Policy halted"),
        }
    }
}

/// Result type for preemption operations
pub type PreemptResult<T> = Result<T, PreemptError>;

/// Configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No CPUs configured
    NoCpus,
    /// More CPUs than a mask can hold
    TooManyCpus,
    /// A zero yield slice would be replaced by the default slice
    ZeroYieldSlice,
    /// An infinite yield slice would never yield
    InfiniteYieldSlice,
    /// The domain id is already registered
    DuplicateDomain(u64),
    /// The domain mask references CPUs beyond the configured range
    DomainOutOfRange(u64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCpus => write!(f, "At least one CPU is required"),
            Self::TooManyCpus => write!(f, "CPU count exceeds MAX_CPUS"),
            Self::ZeroYieldSlice => write!(f, "Yield slice must be non-zero"),
            Self::InfiniteYieldSlice => write!(f, "Yield slice must be finite"),
            Self::DuplicateDomain(id) => write!(f, "Domain {} already registered", id),
            Self::DomainOutOfRange(id) => write!(f, "Domain {} has CPUs out of range", id),
        }
    }
}
