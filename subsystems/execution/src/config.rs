//! Preemption engine configuration.

use lavd_hal::{MAX_CPUS, SLICE_INF, SLICE_MIN};

use crate::error::ConfigError;

/// Default base seed for the per-CPU random streams
pub const DEFAULT_PRNG_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Preemption engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptConfig {
    /// Master switch; when off, dispatch never attempts preemption
    pub enabled: bool,
    /// Number of possible CPU ids
    pub nr_cpu_ids: usize,
    /// Slice written into a victim's running task
    pub yield_slice_ns: u64,
    /// Base seed for the per-CPU random streams
    pub prng_seed: u64,
}

impl PreemptConfig {
    /// Default configuration for `nr_cpu_ids` CPUs
    pub const fn new(nr_cpu_ids: usize) -> Self {
        Self {
            enabled: true,
            nr_cpu_ids,
            yield_slice_ns: SLICE_MIN,
            prng_seed: DEFAULT_PRNG_SEED,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nr_cpu_ids == 0 {
            return Err(ConfigError::NoCpus);
        }
        if self.nr_cpu_ids > MAX_CPUS {
            return Err(ConfigError::TooManyCpus);
        }
        if self.yield_slice_ns == 0 {
            return Err(ConfigError::ZeroYieldSlice);
        }
        if self.yield_slice_ns == SLICE_INF {
            return Err(ConfigError::InfiniteYieldSlice);
        }
        Ok(())
    }
}

impl Default for PreemptConfig {
    fn default() -> Self {
        Self::new(MAX_CPUS)
    }
}
