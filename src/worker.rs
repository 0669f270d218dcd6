// Connection worker - one OS thread owning one native connection
//
// - channel: the task protocol sent to a worker
// - manager: spawning, enqueueing and stopping a worker from caller threads
// - executor: the loop running on the worker thread

mod channel;
mod executor;
mod manager;

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

use crate::latch::ErrorLatch;

pub(crate) use channel::{ResultHeader, Task};
pub(crate) use manager::{TaskSender, Worker};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// The worker thread is opening its connection
    Connecting,
    /// The worker accepts and runs tasks
    Ready,
    /// Finish was requested; queued tasks are still being run
    Draining,
    /// The worker thread has exited
    Stopped,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Connecting => 0,
            WorkerState::Ready => 1,
            WorkerState::Draining => 2,
            WorkerState::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Connecting,
            1 => WorkerState::Ready,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

/// State shared between a worker thread and the handles pointing at it.
#[derive(Debug)]
pub(crate) struct WorkerShared {
    latch: ErrorLatch,
    queued: AtomicUsize,
    state: AtomicU8,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            latch: ErrorLatch::new(),
            queued: AtomicUsize::new(0),
            state: AtomicU8::new(WorkerState::Connecting.as_u8()),
        }
    }

    pub(crate) fn latch(&self) -> &ErrorLatch {
        &self.latch
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Moves `from` to `to` only if the worker is still in `from`.
    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn queued_tasks(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn task_pushed(&self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    fn task_popped(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
    }
}
