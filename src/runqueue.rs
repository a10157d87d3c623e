//! The run queue: processes ordered by vruntime.
//!
//! Entries are keyed by (vruntime, insertion order) so equal vruntimes pop
//! in the order they were inserted. Names are unique handles; inserting a
//! duplicate is rejected without disturbing the existing entry.

use std::collections::{BTreeMap, HashSet};

use ordered_float::OrderedFloat;

use crate::error::SchedError;
use crate::process::Process;

#[derive(Debug, Default)]
pub struct RunQueue {
    /// (vruntime, insertion_order) -> process. The insertion order provides
    /// a stable tiebreaker for equal vruntimes.
    entries: BTreeMap<(OrderedFloat<f64>, u64), Process>,
    /// Names currently queued, for duplicate rejection.
    names: HashSet<String>,
    /// Monotonic counter for insertion ordering.
    insertion_counter: u64,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a process, ordered by its current vruntime.
    pub fn insert(&mut self, process: Process) -> Result<(), SchedError> {
        if self.names.contains(process.name()) {
            return Err(SchedError::DuplicateProcess(process.name().to_string()));
        }
        let order = self.insertion_counter;
        self.insertion_counter += 1;
        self.names.insert(process.name().to_string());
        self.entries
            .insert((OrderedFloat(process.vruntime()), order), process);
        Ok(())
    }

    /// Remove and return the process with the smallest vruntime.
    ///
    /// `None` means the queue is idle, not that anything went wrong.
    pub fn pop_min(&mut self) -> Option<Process> {
        let (&key, _) = self.entries.iter().next()?;
        let process = self.entries.remove(&key)?;
        self.names.remove(process.name());
        Some(process)
    }

    /// Sum of the weights of every queued process.
    ///
    /// Recomputed by iteration on every call; processes enter and leave from
    /// several threads, so a cached sum would go stale.
    pub fn total_weight(&self) -> u64 {
        self.entries.values().map(|p| p.weight() as u64).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Queued names in scheduling order, without consuming.
    pub fn ordered_names(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|p| p.name().to_string())
            .collect()
    }
}
