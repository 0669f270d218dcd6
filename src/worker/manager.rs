use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::config::DatabaseConfig;
use crate::error::SqlPoolError;
use crate::native::{Connector, NativeConnection};

use super::channel::{Reply, Task};
use super::executor::Executor;
use super::{WorkerShared, WorkerState};

/// Cheap handle able to push tasks onto one worker queue.
#[derive(Clone, Debug)]
pub(crate) struct TaskSender {
    id: usize,
    sender: Sender<Task>,
    shared: Arc<WorkerShared>,
}

impl TaskSender {
    /// Append a task to the worker queue. Never blocks.
    pub(crate) fn enqueue(&self, task: Task) -> Result<(), SqlPoolError> {
        self.shared.task_pushed();
        self.sender.send(task).map_err(|_| {
            self.shared.task_popped();
            SqlPoolError::WorkerUnavailable(self.id)
        })
    }

    /// Enqueue a task carrying a reply slot and wait for the worker to fill it.
    pub(crate) async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Task,
    ) -> Result<T, SqlPoolError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(build(tx))?;
        rx.await
            .map_err(|_| SqlPoolError::WorkerUnavailable(self.id))?
    }
}

struct Shutdown {
    stopped: Receiver<()>,
    thread: JoinHandle<()>,
}

/// Owning handle of a worker thread.
pub(crate) struct Worker {
    tasks: TaskSender,
    shutdown: Mutex<Option<Shutdown>>,
}

impl Worker {
    /// Start the worker thread. The returned receiver resolves once the
    /// connection is open (or failed to open).
    pub(crate) fn spawn<C: Connector>(
        id: usize,
        connector: Arc<C>,
        config: Arc<DatabaseConfig>,
    ) -> Result<(Self, oneshot::Receiver<Result<(), SqlPoolError>>), SqlPoolError> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = mpsc::channel::<()>();
        let shared = Arc::new(WorkerShared::new());
        let thread_shared = Arc::clone(&shared);

        let thread = thread::Builder::new()
            .name(format!("sql-worker-{id}"))
            .spawn(move || {
                match open_connection(connector.as_ref(), &config, id) {
                    Ok(conn) => {
                        thread_shared.set_state(WorkerState::Ready);
                        let _ = ready_tx.send(Ok(()));
                        let mut executor = Executor::new(id, conn, Arc::clone(&thread_shared));
                        executor.run(&receiver);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
                thread_shared.set_state(WorkerState::Stopped);
                let _ = stopped_tx.send(());
            })
            .map_err(|err| {
                SqlPoolError::ConnectionError(format!("failed to spawn SQL worker thread: {err}"))
            })?;

        let worker = Self {
            tasks: TaskSender {
                id,
                sender,
                shared,
            },
            shutdown: Mutex::new(Some(Shutdown {
                stopped: stopped_rx,
                thread,
            })),
        };
        Ok((worker, ready_rx))
    }

    pub(crate) fn id(&self) -> usize {
        self.tasks.id
    }

    pub(crate) fn tasks(&self) -> &TaskSender {
        &self.tasks
    }

    pub(crate) fn shared(&self) -> &WorkerShared {
        &self.tasks.shared
    }

    /// Queue the terminal task. Everything queued before it still runs.
    pub(crate) fn request_finish(&self) {
        self.tasks
            .shared
            .transition(WorkerState::Ready, WorkerState::Draining);
        if self.tasks.enqueue(Task::Finish).is_err() {
            debug!(worker = self.id(), "worker already stopped");
        }
    }

    /// Wait up to `timeout` for the worker thread to exit. Returns `false` if
    /// it is still running afterwards; the thread is then left detached.
    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        let Some(shutdown) = self.lock_shutdown().take() else {
            return true;
        };
        match shutdown.stopped.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if shutdown.thread.join().is_err() {
                    error!(worker = self.id(), "SQL worker thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    worker = self.id(),
                    "SQL worker did not stop within {}s",
                    timeout.as_secs()
                );
                false
            }
        }
    }

    fn lock_shutdown(&self) -> MutexGuard<'_, Option<Shutdown>> {
        match self.shutdown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn open_connection<C: Connector>(
    connector: &C,
    config: &DatabaseConfig,
    id: usize,
) -> Result<C::Connection, SqlPoolError> {
    let mut attempt = 0;
    loop {
        let outcome = connector.connect(config, id).and_then(|mut conn| {
            conn.set_autocommit(!config.batches_transactions())?;
            Ok(conn)
        });
        match outcome {
            Ok(conn) => {
                debug!(worker = id, "connection to '{}' established", config.name);
                return Ok(conn);
            }
            Err(err) if attempt < config.connect_retries => {
                attempt += 1;
                error!(
                    worker = id,
                    "the database seems not started, waiting before attempt {} to connect again: {err}",
                    attempt + 1
                );
                thread::sleep(config.connect_retry_delay());
            }
            Err(err) => {
                return Err(SqlPoolError::ConnectionError(format!(
                    "worker {id} could not connect to '{}': {err}",
                    config.name
                )));
            }
        }
    }
}
