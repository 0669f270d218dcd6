//! The pool manager: owns the connection workers and routes work to them.
//!
//! Asynchronous calls (`run_query`, `run_statement`, `prepare_query`) only
//! enqueue a task and return; failures they cause are logged by the worker and,
//! when flagged fatal, latched until the next synchronous call checks them.
//! Synchronous calls wait on a one-shot reply from the worker that ran them.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::error::SqlPoolError;
use crate::latch::LatchedError;
use crate::native::Connector;
use crate::results::QueryResult;
use crate::translation::translate_named_placeholders;
use crate::types::{Bind, NamedStatement, StatementId};
use crate::worker::{Task, Worker, WorkerState};

/// Snapshot of one worker, as reported by [`Dispatcher::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub id: usize,
    pub state: WorkerState,
    /// Tasks enqueued and not yet picked by the worker
    pub queued_tasks: usize,
}

/// Snapshot of a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Asynchronous queries run since the last commit
    pub pending_queries: u32,
    pub workers: Vec<WorkerStats>,
}

/// A pool of connection workers sharing one database configuration.
///
/// Every method takes `&self`; share the dispatcher between tasks with an
/// `Arc`. Dropping it stops the workers.
pub struct Dispatcher {
    config: Arc<DatabaseConfig>,
    workers: Vec<Worker>,
    current: AtomicUsize,
    next_statement: AtomicU32,
    pending: Mutex<u32>,
    finished: AtomicBool,
}

impl Dispatcher {
    /// Start `connections_count` workers, each opening its own connection with
    /// `connector`, and wait until all of them are ready.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConfigError` for an invalid configuration, or the
    /// first connection error. Workers already started are stopped before
    /// returning.
    pub async fn connect<C: Connector>(
        config: DatabaseConfig,
        connector: C,
    ) -> Result<Self, SqlPoolError> {
        config.validate()?;
        let config = Arc::new(config);
        let connector = Arc::new(connector);
        let count = config.connections_count;

        let mut workers = Vec::with_capacity(count);
        let mut readiness = Vec::with_capacity(count);
        let mut failure = None;
        for id in 0..count {
            match Worker::spawn(id, Arc::clone(&connector), Arc::clone(&config)) {
                Ok((worker, ready)) => {
                    workers.push(worker);
                    readiness.push((id, ready));
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        for (id, ready) in readiness {
            let outcome = ready
                .await
                .unwrap_or(Err(SqlPoolError::WorkerUnavailable(id)));
            if let Err(err) = outcome {
                error!(worker = id, "SQL worker failed to start: {err}");
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        }

        let dispatcher = Self {
            config,
            workers,
            current: AtomicUsize::new(0),
            next_statement: AtomicU32::new(1),
            pending: Mutex::new(0),
            finished: AtomicBool::new(false),
        };
        if let Some(err) = failure {
            dispatcher.finish();
            return Err(err);
        }

        info!(
            "connected {} SQL workers to '{}'",
            dispatcher.workers.len(),
            dispatcher.config.name
        );
        Ok(dispatcher)
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    #[must_use]
    pub fn connections_count(&self) -> usize {
        self.workers.len()
    }

    /// Asynchronous queries run since the last commit.
    #[must_use]
    pub fn pending_queries(&self) -> u32 {
        *self.lock_pending()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pending_queries: self.pending_queries(),
            workers: self
                .workers
                .iter()
                .map(|worker| WorkerStats {
                    id: worker.id(),
                    state: worker.shared().state(),
                    queued_tasks: worker.shared().queued_tasks(),
                })
                .collect(),
        }
    }

    /// Queue a query without waiting for it. Returns the worker it went to.
    ///
    /// # Errors
    /// Fails when the pinned worker does not exist, the worker is gone, or the
    /// commit triggered by this query fails.
    pub async fn run_query(
        &self,
        sql: &str,
        error_msg: &str,
        fatal: bool,
        thread: Option<usize>,
    ) -> Result<usize, SqlPoolError> {
        let worker = self.choose_worker(thread)?;
        worker.tasks().enqueue(Task::RunQuery {
            sql: sql.to_owned(),
            error_msg: error_msg.to_owned(),
            fatal,
        })?;
        self.commit_if_needed().await?;
        Ok(worker.id())
    }

    /// Run a query and wait for it. Its rows stay on the returned worker
    /// until [`Dispatcher::get_result`] is called.
    ///
    /// # Errors
    /// Returns a latched fatal error, or the failure of this query.
    pub async fn run_query_sync(
        &self,
        sql: &str,
        error_msg: &str,
        thread: Option<usize>,
    ) -> Result<usize, SqlPoolError> {
        self.check_errors()?;
        let worker = self.choose_worker(thread)?;
        worker
            .tasks()
            .request(|respond_to| Task::RunQuerySync {
                sql: sql.to_owned(),
                error_msg: error_msg.to_owned(),
                respond_to,
            })
            .await?;
        Ok(worker.id())
    }

    /// Prepare `sql` on every worker and return its id at once. A failure is
    /// latched as fatal on the worker where it happened.
    ///
    /// # Errors
    /// Returns `SqlPoolError::WorkerUnavailable` once the dispatcher is
    /// finished or if a worker is gone.
    pub fn prepare_query(&self, sql: &str) -> Result<StatementId, SqlPoolError> {
        let workers = self.running_workers()?;
        let statement_id = self.next_statement_id();
        let sql: Arc<str> = Arc::from(sql);
        for worker in workers {
            worker.tasks().enqueue(Task::Prepare {
                statement_id,
                sql: Arc::clone(&sql),
                respond_to: None,
            })?;
        }
        debug!("statement {statement_id} sent to {} workers", self.workers.len());
        Ok(statement_id)
    }

    /// Prepare `sql` on every worker and wait until each one has done it.
    ///
    /// # Errors
    /// Returns the latched fatal error of the first worker that failed.
    pub async fn prepare_query_sync(&self, sql: &str) -> Result<StatementId, SqlPoolError> {
        let workers = self.running_workers()?;
        let statement_id = self.next_statement_id();
        let sql: Arc<str> = Arc::from(sql);
        let mut waiting = Vec::with_capacity(workers.len());
        for worker in workers {
            let (respond_to, reply) = oneshot::channel();
            worker.tasks().enqueue(Task::Prepare {
                statement_id,
                sql: Arc::clone(&sql),
                respond_to: Some(respond_to),
            })?;
            waiting.push((worker.id(), reply));
        }

        let mut failure = None;
        for (id, reply) in waiting {
            let outcome = reply
                .await
                .unwrap_or(Err(SqlPoolError::WorkerUnavailable(id)));
            if let Err(err) = outcome
                && failure.is_none()
            {
                failure = Some(err);
            }
        }
        self.check_errors()?;
        match failure {
            Some(err) => Err(err),
            None => Ok(statement_id),
        }
    }

    /// Prepare SQL written with `:name` placeholders, like
    /// [`Dispatcher::prepare_query`]. Values are then bound by name on the
    /// bind returned by [`NamedStatement::bind`].
    ///
    /// # Errors
    /// Same as [`Dispatcher::prepare_query`].
    pub fn prepare_named_query(&self, sql: &str) -> Result<NamedStatement, SqlPoolError> {
        let (translated, mapping) = translate_named_placeholders(sql);
        let statement_id = self.prepare_query(&translated)?;
        Ok(NamedStatement::new(statement_id, mapping))
    }

    /// Prepare SQL written with `:name` placeholders, like
    /// [`Dispatcher::prepare_query_sync`].
    ///
    /// # Errors
    /// Same as [`Dispatcher::prepare_query_sync`].
    pub async fn prepare_named_query_sync(
        &self,
        sql: &str,
    ) -> Result<NamedStatement, SqlPoolError> {
        let (translated, mapping) = translate_named_placeholders(sql);
        let statement_id = self.prepare_query_sync(&translated).await?;
        Ok(NamedStatement::new(statement_id, mapping))
    }

    /// Queue a prepared statement execution without waiting for it.
    ///
    /// # Errors
    /// Fails when the pinned worker does not exist, the worker is gone, or the
    /// commit triggered by this statement fails.
    pub async fn run_statement(
        &self,
        statement_id: StatementId,
        bind: Bind,
        error_msg: &str,
        fatal: bool,
        thread: Option<usize>,
    ) -> Result<usize, SqlPoolError> {
        let worker = self.choose_worker(thread)?;
        worker.tasks().enqueue(Task::ExecuteStatement {
            statement_id,
            bind,
            error_msg: error_msg.to_owned(),
            fatal,
        })?;
        self.commit_if_needed().await?;
        Ok(worker.id())
    }

    /// Execute a prepared statement and wait for it. Rows are kept for
    /// [`Dispatcher::get_result`], typed.
    ///
    /// # Errors
    /// Returns a latched fatal error, `SqlPoolError::StatementNotPrepared`, or
    /// the failure of the execution.
    pub async fn run_statement_sync(
        &self,
        statement_id: StatementId,
        bind: Bind,
        error_msg: &str,
        thread: Option<usize>,
    ) -> Result<usize, SqlPoolError> {
        self.check_errors()?;
        let worker = self.choose_worker(thread)?;
        worker
            .tasks()
            .request(|respond_to| Task::ExecuteStatementSync {
                statement_id,
                bind,
                error_msg: error_msg.to_owned(),
                respond_to,
            })
            .await?;
        Ok(worker.id())
    }

    /// Commit every worker. All workers are waited for even when some fail,
    /// and the pending query counter goes back to 0 in every case.
    ///
    /// # Errors
    /// Returns `SqlPoolError::WorkerUnavailable` once the dispatcher is
    /// finished, or `SqlPoolError::CommitFailed` listing every worker that
    /// failed.
    pub async fn commit(&self) -> Result<(), SqlPoolError> {
        *self.lock_pending() = 0;
        self.commit_all().await
    }

    /// Commit a single worker.
    ///
    /// # Errors
    /// Returns `SqlPoolError::UnknownWorker` or the commit failure.
    pub async fn commit_worker(&self, thread: usize) -> Result<(), SqlPoolError> {
        let worker = self.worker(thread)?;
        worker
            .tasks()
            .request(|respond_to| Task::Commit { respond_to })
            .await
    }

    /// Take the rows left by the last synchronous query on `thread`.
    ///
    /// # Errors
    /// Returns a latched fatal error, `SqlPoolError::UnknownWorker`, or
    /// `SqlPoolError::NoPendingResult` when that worker holds no result.
    pub async fn get_result(&self, thread: usize) -> Result<QueryResult, SqlPoolError> {
        self.check_errors()?;
        let worker = self.worker(thread)?;
        let header = worker
            .tasks()
            .request(|respond_to| Task::GetResult { respond_to })
            .await?;
        Ok(QueryResult::new(
            worker.id(),
            header,
            Some(worker.tasks().clone()),
        ))
    }

    /// Move `result` to its next row. Returns `false` once every row was read.
    ///
    /// # Errors
    /// Returns a latched fatal error or `SqlPoolError::WorkerUnavailable`.
    pub async fn fetch_row(&self, result: &mut QueryResult) -> Result<bool, SqlPoolError> {
        self.check_errors()?;
        if result.is_empty() {
            result.set_row(None);
            return Ok(false);
        }
        let worker = self.worker(result.worker_id())?;
        let cursor = result.cursor();
        let row = worker
            .tasks()
            .request(|respond_to| Task::FetchRow { cursor, respond_to })
            .await?;
        let fetched = row.is_some();
        result.set_row(row);
        Ok(fetched)
    }

    /// Rows affected by the last query on `thread`, or by the last execution
    /// of `statement` there.
    ///
    /// # Errors
    /// Returns a latched fatal error, `SqlPoolError::UnknownWorker` or
    /// `SqlPoolError::StatementNotPrepared`.
    pub async fn get_affected_rows(
        &self,
        thread: usize,
        statement: Option<StatementId>,
    ) -> Result<u64, SqlPoolError> {
        self.check_errors()?;
        self.worker(thread)?
            .tasks()
            .request(|respond_to| Task::GetAffectedRows {
                statement_id: statement,
                respond_to,
            })
            .await
    }

    /// Like [`Dispatcher::get_affected_rows`], failing when no row was affected.
    ///
    /// # Errors
    /// Returns `SqlPoolError::NoRowsAffected` carrying `error_msg` when the
    /// count is 0.
    pub async fn check_affected_rows(
        &self,
        thread: usize,
        statement: Option<StatementId>,
        error_msg: &str,
    ) -> Result<u64, SqlPoolError> {
        self.check_errors()?;
        self.worker(thread)?
            .tasks()
            .request(|respond_to| Task::CheckAffectedRows {
                statement_id: statement,
                error_msg: error_msg.to_owned(),
                respond_to,
            })
            .await
    }

    /// Last insert id generated on the connection of `thread`.
    ///
    /// # Errors
    /// Returns a latched fatal error or `SqlPoolError::UnknownWorker`.
    pub async fn get_last_insert_id(&self, thread: usize) -> Result<u64, SqlPoolError> {
        self.check_errors()?;
        self.worker(thread)?
            .tasks()
            .request(|respond_to| Task::GetLastInsertId { respond_to })
            .await
    }

    /// Read and clear the first latched error found, scanning workers in order.
    pub fn get_error(&self) -> Option<LatchedError> {
        self.workers
            .iter()
            .find_map(|worker| worker.shared().latch().get_error())
    }

    /// Clear every latched error. Non-fatal ones are logged; the first fatal
    /// one is returned.
    ///
    /// # Errors
    /// Returns `SqlPoolError::Fatal` for a worker holding a fatal error.
    pub fn check_errors(&self) -> Result<(), SqlPoolError> {
        let mut fatal = None;
        for worker in &self.workers {
            let Some(latched) = worker.shared().latch().get_error() else {
                continue;
            };
            if !latched.is_fatal() {
                warn!(worker = worker.id(), "SQL error: {latched}");
            } else if fatal.is_none() {
                fatal = Some(SqlPoolError::Fatal {
                    worker: worker.id(),
                    message: latched.message().to_owned(),
                });
            } else {
                error!(worker = worker.id(), "fatal SQL error: {latched}");
            }
        }
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop every worker once its queue is drained, waiting at most
    /// `finish_timeout` for each. Calling it again does nothing.
    ///
    /// This blocks the calling thread.
    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("finishing {} SQL workers", self.workers.len());
        for worker in &self.workers {
            worker.request_finish();
        }
        let timeout = self.config.finish_timeout();
        let stopped = self
            .workers
            .iter()
            .filter(|worker| worker.wait_stopped(timeout))
            .count();
        if stopped < self.workers.len() {
            warn!(
                "{} SQL workers still running after shutdown",
                self.workers.len() - stopped
            );
        }
    }

    fn next_statement_id(&self) -> StatementId {
        StatementId(self.next_statement.fetch_add(1, Ordering::AcqRel))
    }

    fn worker(&self, thread: usize) -> Result<&Worker, SqlPoolError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(SqlPoolError::WorkerUnavailable(thread));
        }
        self.workers
            .get(thread)
            .ok_or(SqlPoolError::UnknownWorker(thread))
    }

    /// Every worker, unless the dispatcher is finished.
    fn running_workers(&self) -> Result<&[Worker], SqlPoolError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(SqlPoolError::WorkerUnavailable(0));
        }
        Ok(&self.workers)
    }

    fn choose_worker(&self, thread: Option<usize>) -> Result<&Worker, SqlPoolError> {
        if let Some(thread) = thread {
            return self.worker(thread);
        }
        let count = self.workers.len();
        let (Ok(chosen) | Err(chosen)) =
            self.current
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    Some((current + 1) % count)
                });
        self.worker(chosen)
    }

    async fn commit_if_needed(&self) -> Result<(), SqlPoolError> {
        if !self.config.batches_transactions() {
            return Ok(());
        }
        let threshold_reached = {
            let mut pending = self.lock_pending();
            *pending += 1;
            if *pending >= self.config.queries_per_transaction {
                *pending = 0;
                true
            } else {
                false
            }
        };
        if threshold_reached {
            debug!(
                "{} queries pending, committing",
                self.config.queries_per_transaction
            );
            self.commit_all().await
        } else {
            Ok(())
        }
    }

    async fn commit_all(&self) -> Result<(), SqlPoolError> {
        let workers = self.running_workers()?;
        let mut failures = Vec::new();
        let mut waiting = Vec::with_capacity(workers.len());
        for worker in workers {
            let (respond_to, reply) = oneshot::channel();
            match worker.tasks().enqueue(Task::Commit { respond_to }) {
                Ok(()) => waiting.push((worker.id(), reply)),
                Err(err) => failures.push(format!("worker {}: {err}", worker.id())),
            }
        }

        for (id, reply) in waiting {
            let outcome = reply
                .await
                .unwrap_or(Err(SqlPoolError::WorkerUnavailable(id)));
            if let Err(err) = outcome {
                failures.push(format!("worker {id}: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let message = failures.join("; ");
            error!("commit failed: {message}");
            Err(SqlPoolError::CommitFailed(message))
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, u32> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.config.name)
            .field("workers", &self.workers.len())
            .field("pending_queries", &self.pending_queries())
            .finish_non_exhaustive()
    }
}
