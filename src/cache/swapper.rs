//! Expert swapper: orchestrates expert movement between RAM and disk.
//!
//! The swapper is the central coordinator. It:
//! - Keeps at most `max_memory_experts` records resident, in LRU order
//! - Writes evicted records back to disk asynchronously
//! - Loads missing records synchronously, or in the background for prefetch
//! - Tracks at most one in-flight I/O task per expert id
//!
//! All methods take `&mut self`: a single owner drives the swapper, while the
//! executor's workers only touch the [`ExpertStore`]. Results of background
//! tasks are folded into the cache on the owner thread the next time the id
//! is requested.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::history::{AccessHistory, FailureLog, FailureRecord};
use crate::cache::pending::{OpKind, PendingOp, PendingOps, TaskOutput};
use crate::cache::record::{ExpertId, ExpertRecord, ExpertWeights, Metadata, SharedRecord};
use crate::config::SwapConfig;
use crate::metrics::{SwapMetrics, SwapStats};
use crate::transfer::disk_store::{ExpertStore, FileStore, StoreError};
use crate::transfer::executor::{TaskExecutor, WorkerPool};
use crate::transfer::task::{TaskError, TaskHandle};

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Expert {0} not found")]
    NotFound(ExpertId),

    #[error("Timed out after {waited:?} waiting for expert {id}")]
    Timeout { id: ExpertId, waited: Duration },

    #[error("Storage error: {0}")]
    Store(#[source] StoreError),

    #[error("Background {op} of expert {id} failed: {source}")]
    Task {
        id: ExpertId,
        op: OpKind,
        #[source]
        source: TaskError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start I/O executor: {0}")]
    Executor(#[source] std::io::Error),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<StoreError> for SwapError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, .. } => SwapError::NotFound(id),
            other => SwapError::Store(other),
        }
    }
}

impl SwapError {
    fn from_task(id: &str, op: OpKind, err: TaskError) -> Self {
        match err {
            TaskError::Failed(StoreError::NotFound { id, .. }) => SwapError::NotFound(id),
            source => SwapError::Task {
                id: id.to_string(),
                op,
                source,
            },
        }
    }
}

/// Where an expert currently lives, from the swapper's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertState {
    /// Unknown to the swapper.
    Absent,
    /// Not resident, with a load or write-back in flight.
    Pending(OpKind),
    /// Resident in RAM, no I/O in flight.
    Resident,
    /// Resident in RAM while a write of it is in flight.
    ResidentPersisting,
    /// Only on disk.
    Evicted,
}

/// The expert swapper.
pub struct Swapper {
    /// Resident records, LRU first.
    cache: LruCache<ExpertId, SharedRecord>,

    /// Ids with a persisted or persisting copy on disk.
    on_disk: HashSet<ExpertId>,

    /// In-flight I/O, one task per id.
    pending: PendingOps,

    /// Recently requested ids. Not consulted by any decision.
    access_history: AccessHistory,

    /// Recently failed background tasks.
    failures: FailureLog,

    store: Arc<dyn ExpertStore>,
    executor: Arc<dyn TaskExecutor>,
    metrics: SwapMetrics,
    config: SwapConfig,
    closed: bool,
}

impl Swapper {
    /// Create a swapper with a [`FileStore`] under `config.storage_dir` and a
    /// [`WorkerPool`] of `config.io_workers` threads.
    pub fn new(config: SwapConfig) -> Result<Self, SwapError> {
        let store = FileStore::open(&config.storage_dir, config.compression.clone())?;
        let executor = WorkerPool::new(
            config.io_workers,
            Duration::from_millis(config.shutdown_grace_ms),
        )
        .map_err(SwapError::Executor)?;
        Self::with_parts(config, Arc::new(store), Arc::new(executor))
    }

    /// Create a swapper with an injected store and executor.
    pub fn with_parts(
        config: SwapConfig,
        store: Arc<dyn ExpertStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, SwapError> {
        if config.max_memory_experts == 0 {
            return Err(SwapError::InvalidConfig(
                "max_memory_experts must be at least 1".to_string(),
            ));
        }

        info!(
            storage_dir = %config.storage_dir.display(),
            max_memory_experts = config.max_memory_experts,
            executor = executor.name(),
            "Expert swapper ready"
        );

        Ok(Self {
            cache: LruCache::unbounded(),
            on_disk: HashSet::new(),
            pending: PendingOps::new(),
            access_history: AccessHistory::new(config.access_history),
            failures: FailureLog::new(config.failure_history),
            store,
            executor,
            metrics: SwapMetrics::new()?,
            config,
            closed: false,
        })
    }

    /// Register an expert and make it resident as most recently used.
    ///
    /// Capacity is not enforced here; the next admission through
    /// [`swap_in`](Self::swap_in) or [`get`](Self::get) evicts as needed.
    /// With `persist`, a background write is issued and the id is marked
    /// on-disk immediately.
    pub fn register(
        &mut self,
        id: impl Into<ExpertId>,
        gate: impl Into<Bytes>,
        up: impl Into<Bytes>,
        down: impl Into<Bytes>,
        metadata: Metadata,
        persist: bool,
    ) -> SharedRecord {
        let record = ExpertRecord::new(id, ExpertWeights::new(gate, up, down), metadata);
        self.register_record(record, persist)
    }

    /// [`register`](Self::register) for an already assembled record.
    pub fn register_record(&mut self, record: ExpertRecord, persist: bool) -> SharedRecord {
        let id = record.id.clone();
        self.settle_and_discard(&id);

        let record = Arc::new(record);
        self.cache.put(id.clone(), record.clone());
        if persist {
            self.issue_store(&id, record.clone());
        }
        self.sync_gauges();

        debug!(
            expert = %id,
            persist,
            bytes = record.byte_len(),
            resident = self.cache.len(),
            "Registered expert"
        );
        record
    }

    /// Bring an expert into RAM.
    ///
    /// Synchronous mode returns the record, reading it from disk if needed.
    /// Background mode never returns data: it issues a load (or declines if
    /// an operation for the id is already in flight) and the caller collects
    /// the result later with [`get`](Self::get).
    pub fn swap_in(
        &mut self,
        id: &str,
        background: bool,
        priority: u32,
    ) -> Result<Option<SharedRecord>, SwapError> {
        if let Some(done) = self.pending.is_done(id) {
            if !done && background {
                debug!(expert = id, "Operation in flight, background swap-in declined");
                return Ok(None);
            }
            if let Some(op) = self.pending.take(id) {
                // Failures are already in the failure log; the disk is
                // consulted again below.
                if let Ok(Some(record)) = self.settle(id, op) {
                    self.admit(id, record);
                }
            }
            self.sync_gauges();
        }

        self.access_history.record(id);

        if let Some(record) = self.cache.get(id) {
            let record = record.clone();
            self.metrics.hits.inc();
            return Ok(if background { None } else { Some(record) });
        }
        self.metrics.misses.inc();

        // Background admission leaves a slot free for the incoming record.
        let limit = self.config.max_memory_experts - usize::from(background);
        self.make_room(limit);

        if background {
            self.issue_load(id, priority);
            self.sync_gauges();
            return Ok(None);
        }

        let record = Arc::new(self.store.read(id)?);
        self.metrics.disk_reads.inc();
        self.cache.put(id.to_string(), record.clone());
        self.on_disk.insert(id.to_string());
        self.sync_gauges();

        debug!(expert = id, priority, resident = self.cache.len(), "Swapped in expert");
        Ok(Some(record))
    }

    /// Write a resident expert to disk now and drop it from RAM.
    ///
    /// Non-resident ids are a no-op. `force` is accepted for API
    /// compatibility; the write is unconditional either way.
    pub fn swap_out(&mut self, id: &str, force: bool) -> Result<(), SwapError> {
        let Some(record) = self.cache.peek(id).cloned() else {
            debug!(expert = id, "Swap-out of non-resident expert ignored");
            return Ok(());
        };

        self.settle_and_discard(id);
        self.store.write(&record)?;
        self.metrics.write_backs.inc();

        self.cache.pop(id);
        self.on_disk.insert(id.to_string());
        self.sync_gauges();

        debug!(expert = id, force, "Swapped out expert");
        Ok(())
    }

    /// Return an expert's weights, waiting for in-flight I/O.
    ///
    /// With a `timeout`, a pending operation that does not finish in time
    /// fails with [`SwapError::Timeout`]; the task keeps running and its
    /// result is picked up by a later call. Without one, waits indefinitely.
    pub fn get(&mut self, id: &str, timeout: Option<Duration>) -> Result<ExpertWeights, SwapError> {
        if let Some(record) = self.cache.get(id) {
            self.metrics.hits.inc();
            return Ok(record.weights.clone());
        }

        if let Some(op) = self.pending.get(id) {
            if !op.handle.wait(timeout) {
                self.metrics.timeouts.inc();
                debug!(expert = id, ?timeout, "Timed out waiting for expert");
                return Err(SwapError::Timeout {
                    id: id.to_string(),
                    waited: timeout.unwrap_or_default(),
                });
            }

            if let Some(op) = self.pending.take(id) {
                let loaded = self.settle(id, op);
                self.sync_gauges();
                // A finished write-back falls through to `swap_in`, which
                // counts the miss itself.
                if !matches!(loaded, Ok(None)) {
                    self.metrics.misses.inc();
                }
                if let Some(record) = loaded? {
                    let record = self.admit(id, record);
                    return Ok(record.weights.clone());
                }
            }
        }

        match self.swap_in(id, false, 0)? {
            Some(record) => Ok(record.weights.clone()),
            None => Err(SwapError::NotFound(id.to_string())),
        }
    }

    /// Remove an expert from RAM and disk.
    ///
    /// Any in-flight operation for the id is waited for first, so a late
    /// write-back cannot recreate the file. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: &str) -> Result<(), SwapError> {
        self.settle_and_discard(id);
        let was_resident = self.cache.pop(id).is_some();

        let was_on_disk = self.on_disk.contains(id);
        if was_on_disk {
            self.store.remove(id)?;
            self.on_disk.remove(id);
        }
        self.sync_gauges();

        debug!(expert = id, was_resident, was_on_disk, "Unregistered expert");
        Ok(())
    }

    /// Wait for every pending operation.
    ///
    /// Every failure is recorded in the failure log; the first one is
    /// returned once the table is empty.
    pub fn flush(&mut self) -> Result<(), SwapError> {
        let drained = self.pending.drain();
        let count = drained.len();

        let mut first_err = None;
        for (id, op) in drained {
            if let Err(e) = self.settle(&id, op) {
                first_err.get_or_insert(e);
            }
        }
        self.sync_gauges();

        if count > 0 {
            debug!(count, failed = first_err.is_some(), "Flushed pending operations");
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush and release the executor. Must be called before the swapper is
    /// dropped for pending writes to be guaranteed on disk.
    pub fn shutdown(&mut self) -> Result<(), SwapError> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush();
        self.executor.shutdown();
        self.closed = true;

        info!(
            resident = self.cache.len(),
            on_disk = self.on_disk.len(),
            failures = self.failures.total(),
            "Expert swapper shut down"
        );
        flushed
    }

    // ── diagnostics ──────────────────────────────────────────────────

    pub fn state(&self, id: &str) -> ExpertState {
        let resident = self.cache.contains(id);
        match (resident, self.pending.get(id).map(|op| op.kind)) {
            (true, Some(OpKind::Store)) => ExpertState::ResidentPersisting,
            (true, _) => ExpertState::Resident,
            (false, Some(kind)) => ExpertState::Pending(kind),
            (false, None) if self.on_disk.contains(id) => ExpertState::Evicted,
            (false, None) => ExpertState::Absent,
        }
    }

    pub fn is_resident(&self, id: &str) -> bool {
        self.cache.contains(id)
    }

    pub fn is_on_disk(&self, id: &str) -> bool {
        self.on_disk.contains(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn resident_len(&self) -> usize {
        self.cache.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Resident ids from least to most recently used.
    pub fn resident_ids(&self) -> Vec<ExpertId> {
        self.cache.iter().rev().map(|(id, _)| id.clone()).collect()
    }

    /// Payload bytes currently held in RAM.
    pub fn resident_bytes(&self) -> usize {
        self.cache.iter().map(|(_, r)| r.byte_len()).sum()
    }

    /// Recently requested ids, oldest first.
    pub fn recent_accesses(&self) -> Vec<ExpertId> {
        self.access_history.iter().map(str::to_string).collect()
    }

    /// Recently failed background operations, oldest first.
    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        self.failures.entries().cloned().collect()
    }

    pub fn prefetch_window(&self) -> usize {
        self.config.prefetch_window
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SwapMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> SwapStats {
        self.metrics.snapshot()
    }

    // ── internals ────────────────────────────────────────────────────

    /// Insert a record produced by a completed load, evicting first so the
    /// capacity bound holds.
    fn admit(&mut self, id: &str, record: SharedRecord) -> SharedRecord {
        if !self.cache.contains(id) {
            self.make_room(self.config.max_memory_experts);
        }
        self.cache.put(id.to_string(), record.clone());
        self.sync_gauges();
        record
    }

    /// Evict until fewer than `limit` records are resident.
    fn make_room(&mut self, limit: usize) {
        while self.cache.len() >= limit {
            if !self.evict_lru() {
                break;
            }
        }
    }

    /// Evict the least recently used record and write it back.
    fn evict_lru(&mut self) -> bool {
        let Some((id, record)) = self.cache.pop_lru() else {
            return false;
        };
        self.metrics.evictions.inc();
        debug!(expert = %id, resident = self.cache.len(), "Evicting expert");

        if let Some(op) = self.pending.get(&id) {
            if op.is_store_of(&record) && !op.handle.done() {
                // This exact record is already being written.
                return true;
            }
            if let Some(op) = self.pending.take(&id) {
                let same = op.is_store_of(&record);
                // Blocks only if an unrelated operation is still running.
                if self.settle(&id, op).is_ok() && same {
                    return true;
                }
            }
        }

        self.issue_store(&id, record);
        true
    }

    fn issue_store(&mut self, id: &str, record: SharedRecord) {
        let store = self.store.clone();
        let job_record = record.clone();
        let handle = TaskHandle::spawn(self.executor.as_ref(), move || {
            store.write(&job_record)?;
            Ok(TaskOutput::Stored)
        });

        self.pending.insert(id.to_string(), PendingOp::store(record, handle));
        self.on_disk.insert(id.to_string());
        self.metrics.write_backs.inc();
    }

    fn issue_load(&mut self, id: &str, priority: u32) {
        let store = self.store.clone();
        let key = id.to_string();
        let handle = TaskHandle::spawn(self.executor.as_ref(), move || {
            let record = store.read(&key)?;
            Ok(TaskOutput::Loaded(Arc::new(record)))
        });

        self.pending.insert(id.to_string(), PendingOp::load(handle));
        self.metrics.background_loads.inc();
        debug!(expert = id, priority, "Issued background load");
    }

    /// Wait for a pending operation and take its outcome. Failures are
    /// recorded in the failure log before being returned.
    fn settle(&mut self, id: &str, op: PendingOp) -> Result<Option<SharedRecord>, SwapError> {
        let kind = op.kind;
        match op.handle.result(None) {
            Ok(TaskOutput::Loaded(record)) => Ok(Some(record)),
            Ok(TaskOutput::Stored) => Ok(None),
            Err(e) => {
                warn!(expert = id, op = %kind, error = %e, "Background operation failed");
                self.metrics.task_failures.inc();
                self.failures.push(id, kind, &e);
                Err(SwapError::from_task(id, kind, e))
            }
        }
    }

    /// Settle any pending operation for `id`, dropping its outcome.
    fn settle_and_discard(&mut self, id: &str) {
        if let Some(op) = self.pending.take(id) {
            let _ = self.settle(id, op);
        }
    }

    fn sync_gauges(&self) {
        self.metrics.resident_experts.set(self.cache.len() as i64);
        self.metrics.pending_operations.set(self.pending.len() as i64);
    }
}

impl Drop for Swapper {
    fn drop(&mut self) {
        if !self.closed && !self.pending.is_empty() {
            warn!(
                pending = self.pending.len(),
                "Swapper dropped without shutdown(); pending operations were not flushed"
            );
        }
    }
}

impl std::fmt::Debug for Swapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapper")
            .field("resident", &self.cache.len())
            .field("on_disk", &self.on_disk.len())
            .field("pending", &self.pending.len())
            .field("max_memory_experts", &self.config.max_memory_experts)
            .field("closed", &self.closed)
            .finish()
    }
}
