//! Bounded histories kept by the swapper.
//!
//! - [`AccessHistory`]: recently requested expert ids, oldest dropped first.
//!   Retained for prefetch heuristics; nothing in the swapper reads it.
//! - [`FailureLog`]: recently failed background operations, so an error whose
//!   task handle was consumed on a non-propagating path is still observable.

use std::collections::VecDeque;
use std::time::SystemTime;

use serde::Serialize;

use crate::cache::pending::OpKind;
use crate::cache::record::ExpertId;

/// FIFO of the most recent `capacity` accessed ids.
#[derive(Debug, Clone)]
pub struct AccessHistory {
    ids: VecDeque<ExpertId>,
    capacity: usize,
}

impl AccessHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, id: &str) {
        if self.capacity == 0 {
            return;
        }
        while self.ids.len() >= self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id.to_string());
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One failed background operation.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub id: ExpertId,
    pub op: OpKind,
    pub error: String,
    pub at: SystemTime,
}

/// Ring of the most recent background failures.
#[derive(Debug, Clone)]
pub struct FailureLog {
    entries: VecDeque<FailureRecord>,
    capacity: usize,
    total: u64,
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, id: &str, op: OpKind, error: impl ToString) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(FailureRecord {
            id: id.to_string(),
            op,
            error: error.to_string(),
            at: SystemTime::now(),
        });
    }

    /// Retained failures, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &FailureRecord> {
        self.entries.iter()
    }

    /// Failures ever recorded, including ones already dropped from the ring.
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_history_drops_oldest() {
        let mut history = AccessHistory::new(3);
        for id in ["a", "b", "c", "d"] {
            history.record(id);
        }
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_zero_capacity_history() {
        let mut history = AccessHistory::new(0);
        history.record("a");
        assert!(history.is_empty());
    }

    #[test]
    fn test_failure_log_keeps_total() {
        let mut log = FailureLog::new(2);
        log.push("a", OpKind::Store, "disk full");
        log.push("b", OpKind::Load, "missing");
        log.push("c", OpKind::Store, "disk full");

        let ids: Vec<_> = log.entries().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(log.total(), 3);
    }
}
