//! # Task Records
//!
//! Per-task scheduling state consumed by the preemption engine. Records are
//! created, updated and destroyed by task lifecycle bookkeeping; the engine
//! only ever reads a copy.

use alloc::collections::BTreeMap;

use lavd_hal::{CpuMask, MAX_CPUS};
use spin::RwLock;

/// Task identifier
pub type TaskId = u32;

// ============================================================================
// TASK CONTEXT
// ============================================================================

/// Scheduling state of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    /// Latency criticality; higher is more urgent
    pub lat_cri: u64,
    /// Average runtime per scheduling, in nanoseconds
    pub avg_runtime: u64,
    /// Classified as a greedy (low-priority) task
    pub greedy: bool,
    /// CPUs the task may run on
    pub affinity: CpuMask,
}

impl TaskContext {
    /// Create a task allowed on every CPU
    pub fn new(lat_cri: u64, avg_runtime: u64) -> Self {
        Self {
            lat_cri,
            avg_runtime,
            greedy: false,
            affinity: CpuMask::first_n(MAX_CPUS),
        }
    }

    /// Restrict the task to `affinity`
    pub fn with_affinity(mut self, affinity: CpuMask) -> Self {
        self.affinity = affinity;
        self
    }

    /// Mark the task greedy
    pub fn with_greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    /// Time at which the task would give up a CPU if it started at `now`
    #[inline(always)]
    pub fn est_stopping_time(&self, now: u64) -> u64 {
        now.saturating_add(self.avg_runtime)
    }
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Keyed lookup of task records
pub trait TaskStore: Send + Sync {
    /// Look up a task; `None` means the task is unknown
    fn lookup_task(&self, pid: TaskId) -> Option<TaskContext>;
}

/// Greedy-task classification
pub trait TaskClassifier: Send + Sync {
    /// Whether the task is currently classified as greedy
    fn is_greedy(&self, pid: TaskId, task: &TaskContext) -> bool;
}

/// Classifier that trusts the flag stored in the task record
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordClassifier;

impl TaskClassifier for RecordClassifier {
    #[inline]
    fn is_greedy(&self, _pid: TaskId, task: &TaskContext) -> bool {
        task.greedy
    }
}

// ============================================================================
// TASK TABLE
// ============================================================================

/// In-memory task store
///
/// Writers are lifecycle events; hook bodies only take the read side.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: RwLock<BTreeMap<TaskId, TaskContext>>,
}

impl TaskTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace a task record
    pub fn insert(&self, pid: TaskId, task: TaskContext) {
        self.tasks.write().insert(pid, task);
    }

    /// Update a task record in place; returns `false` if unknown
    pub fn update<F>(&self, pid: TaskId, f: F) -> bool
    where
        F: FnOnce(&mut TaskContext),
    {
        match self.tasks.write().get_mut(&pid) {
            Some(task) => {
                f(task);
                true
            },
            None => false,
        }
    }

    /// Remove a task record
    pub fn remove(&self, pid: TaskId) -> Option<TaskContext> {
        self.tasks.write().remove(&pid)
    }

    /// Number of tracked tasks
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Check if no task is tracked
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

impl TaskStore for TaskTable {
    #[inline]
    fn lookup_task(&self, pid: TaskId) -> Option<TaskContext> {
        self.tasks.read().get(&pid).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lifecycle() {
        let table = TaskTable::new();
        assert!(table.is_empty());

        table.insert(10, TaskContext::new(5, 100));
        assert_eq!(table.lookup_task(10).map(|t| t.lat_cri), Some(5));

        assert!(table.update(10, |t| t.lat_cri = 9));
        assert_eq!(table.lookup_task(10).map(|t| t.lat_cri), Some(9));
        assert!(!table.update(11, |t| t.lat_cri = 1));

        assert!(table.remove(10).is_some());
        assert_eq!(table.lookup_task(10), None);
    }

    #[test]
    fn test_est_stopping_time_saturates() {
        let task = TaskContext::new(1, 800);
        assert_eq!(task.est_stopping_time(0), 800);
        assert_eq!(task.est_stopping_time(u64::MAX - 10), u64::MAX);
    }

    #[test]
    fn test_record_classifier() {
        let task = TaskContext::new(1, 1).with_greedy(true);
        assert!(RecordClassifier.is_greedy(1, &task));
        assert!(!RecordClassifier.is_greedy(1, &task.with_greedy(false)));
    }
}
