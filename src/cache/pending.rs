//! Pending-operation table: the single in-flight I/O task per expert id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cache::record::{ExpertId, SharedRecord};
use crate::transfer::task::TaskHandle;

/// Direction of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Disk → RAM.
    Load,
    /// RAM → disk.
    Store,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Load => write!(f, "load"),
            OpKind::Store => write!(f, "store"),
        }
    }
}

/// What a finished I/O task produced.
#[derive(Debug)]
pub enum TaskOutput {
    Loaded(SharedRecord),
    Stored,
}

/// An in-flight task and what it is doing.
#[derive(Debug)]
pub struct PendingOp {
    pub kind: OpKind,
    /// The record being written, for stores.
    pub record: Option<SharedRecord>,
    pub handle: TaskHandle<TaskOutput>,
    pub issued_at: Instant,
}

impl PendingOp {
    pub fn load(handle: TaskHandle<TaskOutput>) -> Self {
        Self {
            kind: OpKind::Load,
            record: None,
            handle,
            issued_at: Instant::now(),
        }
    }

    pub fn store(record: SharedRecord, handle: TaskHandle<TaskOutput>) -> Self {
        Self {
            kind: OpKind::Store,
            record: Some(record),
            handle,
            issued_at: Instant::now(),
        }
    }

    /// Whether this is a write of exactly `record` (same allocation).
    pub fn is_store_of(&self, record: &SharedRecord) -> bool {
        self.record
            .as_ref()
            .is_some_and(|pending| Arc::ptr_eq(pending, record))
    }
}

/// id → pending operation. Holds at most one entry per id.
#[derive(Debug, Default)]
pub struct PendingOps {
    ops: HashMap<ExpertId, PendingOp>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `op` for `id`.
    ///
    /// Returns the operation it displaced, which the caller is responsible
    /// for settling. The swapper settles before inserting, so this is `None`
    /// in practice.
    pub fn insert(&mut self, id: ExpertId, op: PendingOp) -> Option<PendingOp> {
        self.ops.insert(id, op)
    }

    pub fn get(&self, id: &str) -> Option<&PendingOp> {
        self.ops.get(id)
    }

    pub fn take(&mut self, id: &str) -> Option<PendingOp> {
        self.ops.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ops.contains_key(id)
    }

    /// `Some(done)` if an operation is pending for `id`.
    pub fn is_done(&self, id: &str) -> Option<bool> {
        self.ops.get(id).map(|op| op.handle.done())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Remove and return every pending operation.
    pub fn drain(&mut self) -> Vec<(ExpertId, PendingOp)> {
        self.ops.drain().collect()
    }
}
