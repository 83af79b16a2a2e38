//! Executors for blocking disk I/O.
//!
//! The swapper never performs background I/O itself: it hands boxed units of
//! work to a [`TaskExecutor`] and keeps the resulting
//! [`TaskHandle`](crate::transfer::task::TaskHandle). Executors are injected,
//! so tests can swap the thread pool for a deterministic one.
//!
//! - [`WorkerPool`]: dedicated tokio runtime, jobs run on its blocking pool
//! - [`InlineExecutor`]: runs work on the submitting thread
//! - [`DeferredExecutor`]: queues work until the owner explicitly runs it

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

/// A unit of work submitted to an executor.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs units of work off (or, for test executors, on) the calling thread.
pub trait TaskExecutor: Send + Sync {
    /// Schedule `work`. Must not block on the work itself unless the
    /// executor is documented to run inline.
    fn execute(&self, work: Work);

    /// Release executor resources. Work not yet started may be discarded.
    fn shutdown(&self) {}

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Thread pool backed by the blocking pool of a private current-thread
/// tokio runtime. The runtime itself is never driven; jobs go through
/// `spawn_blocking`, so with one worker they run in submission order.
pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    workers: usize,
    grace: Duration,
    submitted: AtomicU64,
}

impl WorkerPool {
    /// Create a pool with `workers` blocking I/O threads (at least one).
    pub fn new(workers: usize, grace: Duration) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_current_thread()
            .max_blocking_threads(workers)
            .thread_name("expert-io")
            .build()?;

        info!(workers, "Started expert I/O worker pool");

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            workers,
            grace,
            submitted: AtomicU64::new(0),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Total units of work accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, work: Work) {
        let guard = self.runtime.lock();
        match guard.as_ref() {
            Some(runtime) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                drop(runtime.spawn_blocking(work));
            }
            None => {
                // Dropping the work resolves its handle as `Dropped`.
                warn!("Worker pool already shut down, discarding task");
            }
        }
    }

    fn shutdown(&self) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            debug!(grace_ms = self.grace.as_millis() as u64, "Shutting down worker pool");
            runtime.shutdown_timeout(self.grace);
            info!(submitted = self.submitted(), "Worker pool stopped");
        }
    }

    fn name(&self) -> &'static str {
        "worker-pool"
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_timeout(self.grace);
        }
    }
}

/// Runs every unit of work synchronously inside `execute`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, work: Work) {
        work();
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Queues work until [`run_next`](Self::run_next) or
/// [`run_pending`](Self::run_pending) is called.
///
/// Lets tests observe tasks that have been submitted but not yet started.
#[derive(Default)]
pub struct DeferredExecutor {
    queue: Mutex<VecDeque<Work>>,
}

impl DeferredExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the oldest queued unit of work. Returns false if none was queued.
    pub fn run_next(&self) -> bool {
        let work = self.queue.lock().pop_front();
        match work {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Run everything queued, including work queued while running.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

impl TaskExecutor for DeferredExecutor {
    fn execute(&self, work: Work) {
        self.queue.lock().push_back(work);
    }

    fn shutdown(&self) {
        let discarded: Vec<Work> = self.queue.lock().drain(..).collect();
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "Discarding queued work on shutdown");
        }
    }

    fn name(&self) -> &'static str {
        "deferred"
    }
}
