//! Result-or-error handles for asynchronous I/O tasks.
//!
//! A [`TaskHandle`] is filled exactly once by the worker that runs its job.
//! If the executor discards the job without running it (e.g. after shutdown)
//! the handle resolves to [`TaskError::Dropped`] instead of blocking forever.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::transfer::disk_store::StoreError;
use crate::transfer::executor::TaskExecutor;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Failed(#[from] StoreError),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task was dropped before completing (executor shut down)")]
    Dropped,

    #[error("Task did not complete within {0:?}")]
    Timeout(Duration),
}

enum SlotState<T> {
    Running,
    Done(Result<T, TaskError>),
    Taken,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn new(state: SlotState<T>) -> Self {
        Self {
            state: Mutex::new(state),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, outcome: Result<T, TaskError>) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Running) {
            *state = SlotState::Done(outcome);
            self.ready.notify_all();
        }
    }
}

/// Worker-side end of a task. Resolves the handle to `Dropped` if it goes
/// away without completing.
struct Completer<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.slot.fill(Err(TaskError::Dropped));
    }
}

/// Owner-side handle to an asynchronous task.
pub struct TaskHandle<T> {
    slot: Arc<Slot<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Submit `job` to `executor` and return its handle.
    ///
    /// Never blocks unless the executor itself runs work inline.
    pub fn spawn<F>(executor: &dyn TaskExecutor, job: F) -> Self
    where
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    {
        let slot = Arc::new(Slot::new(SlotState::Running));
        let completer = Completer { slot: slot.clone() };

        executor.execute(Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result.map_err(TaskError::Failed),
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };
            completer.slot.fill(outcome);
        }));

        Self { slot }
    }
}

impl<T> TaskHandle<T> {
    /// A handle that is already complete.
    pub fn ready(outcome: Result<T, TaskError>) -> Self {
        Self {
            slot: Arc::new(Slot::new(SlotState::Done(outcome))),
        }
    }

    /// Non-blocking completion check.
    pub fn done(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Running)
    }

    /// Block until the task completes or `timeout` elapses (`None` waits
    /// indefinitely). Returns whether the task is complete.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.slot.state.lock();
        match timeout {
            None => {
                while matches!(*state, SlotState::Running) {
                    self.slot.ready.wait(&mut state);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while matches!(*state, SlotState::Running) {
                    if self.slot.ready.wait_until(&mut state, deadline).timed_out() {
                        return !matches!(*state, SlotState::Running);
                    }
                }
                true
            }
        }
    }

    /// Wait for the task and take its result.
    ///
    /// On timeout the handle is consumed but the task keeps running; callers
    /// that need to poll again should use [`wait`](Self::wait) first.
    pub fn result(self, timeout: Option<Duration>) -> Result<T, TaskError> {
        if !self.wait(timeout) {
            return Err(TaskError::Timeout(timeout.unwrap_or_default()));
        }
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Done(outcome) => outcome,
            // A handle is not cloneable, so its result can only be taken once.
            SlotState::Running | SlotState::Taken => Err(TaskError::Dropped),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("done", &self.done()).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
