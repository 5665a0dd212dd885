//! # Compute Domains
//!
//! A compute domain groups CPUs that share a dispatch queue. Victim search
//! for a task is scoped to the CPUs of the domain it is queued on.
//!
//! Domain records and domain masks are kept apart, the way the loader
//! publishes them: a mask may be momentarily unpublished (benign), but a
//! published mask without a record means the registry is corrupt.

use alloc::collections::BTreeMap;

use lavd_hal::{CpuMask, MAX_CPUS};

use crate::error::ConfigError;

/// Compute domain record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainContext {
    /// Dispatch queue id
    pub id: u64,
    /// Number of CPUs in the domain
    pub nr_cpus: u32,
}

/// Lookup of compute domains by dispatch queue id
pub trait DomainRegistry: Send + Sync {
    /// Domain record for a dispatch queue
    fn domain(&self, dsq_id: u64) -> Option<&DomainContext>;

    /// CPU mask of a dispatch queue's domain
    fn domain_cpumask(&self, dsq_id: u64) -> Option<&CpuMask>;
}

/// Domain registry built before the policy attaches
#[derive(Debug, Default)]
pub struct DomainTable {
    nr_cpu_ids: usize,
    records: BTreeMap<u64, DomainContext>,
    cpumasks: BTreeMap<u64, CpuMask>,
}

impl DomainTable {
    /// Create an empty registry for `nr_cpu_ids` CPUs
    pub fn new(nr_cpu_ids: usize) -> Self {
        Self {
            nr_cpu_ids: nr_cpu_ids.min(MAX_CPUS),
            records: BTreeMap::new(),
            cpumasks: BTreeMap::new(),
        }
    }

    /// Register a domain and publish its mask
    pub fn register(&mut self, id: u64, cpumask: CpuMask) -> Result<(), ConfigError> {
        if self.records.contains_key(&id) || self.cpumasks.contains_key(&id) {
            return Err(ConfigError::DuplicateDomain(id));
        }
        if cpumask.iter().any(|cpu| cpu as usize >= self.nr_cpu_ids) {
            return Err(ConfigError::DomainOutOfRange(id));
        }

        self.records.insert(id, DomainContext {
            id,
            nr_cpus: cpumask.weight(),
        });
        self.cpumasks.insert(id, cpumask);
        log::debug!("Domain {}: {:?}", id, cpumask);
        Ok(())
    }

    /// Withdraw a domain's mask while keeping its record
    pub fn unpublish_cpumask(&mut self, id: u64) -> Option<CpuMask> {
        self.cpumasks.remove(&id)
    }

    /// Drop a domain's record while keeping its mask
    pub fn drop_record(&mut self, id: u64) -> Option<DomainContext> {
        self.records.remove(&id)
    }

    /// Number of registered domains
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no domain is registered
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DomainRegistry for DomainTable {
    #[inline]
    fn domain(&self, dsq_id: u64) -> Option<&DomainContext> {
        self.records.get(&dsq_id)
    }

    #[inline]
    fn domain_cpumask(&self, dsq_id: u64) -> Option<&CpuMask> {
        self.cpumasks.get(&dsq_id)
    }
}
