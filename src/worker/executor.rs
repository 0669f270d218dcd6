use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::error::SqlPoolError;
use crate::native::{NativeConnection, NativeError, Outcome};
use crate::results::{ResultMode, Row, RowSet};
use crate::types::{Bind, StatementId};

use super::WorkerShared;
use super::channel::{ResultHeader, Task};

const MAX_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_millis(50);

struct Prepared<S> {
    sql: Arc<str>,
    handle: S,
    affected_rows: u64,
}

struct Cursor {
    mode: ResultMode,
    columns: Arc<Vec<String>>,
    rows: VecDeque<Row>,
}

impl Cursor {
    fn new(mode: ResultMode, rows: Option<RowSet>) -> Self {
        let RowSet { columns, rows } = rows.unwrap_or_default();
        Self {
            mode,
            columns,
            rows: rows.into(),
        }
    }
}

/// Worker-thread side of a connection worker: owns the native connection, its
/// prepared statements and the result sets waiting to be fetched.
///
/// Fields drop in declaration order: statements and results go before the
/// connection they belong to.
pub(super) struct Executor<C: NativeConnection> {
    id: usize,
    shared: Arc<WorkerShared>,
    statements: HashMap<StatementId, Prepared<C::Statement>>,
    pending: Option<Cursor>,
    cursors: HashMap<u64, Cursor>,
    next_cursor: u64,
    need_commit: bool,
    affected_rows: u64,
    last_insert_id: u64,
    conn: C,
}

impl<C: NativeConnection> Executor<C> {
    pub(super) fn new(id: usize, conn: C, shared: Arc<WorkerShared>) -> Self {
        Self {
            id,
            conn,
            shared,
            statements: HashMap::new(),
            need_commit: false,
            affected_rows: 0,
            last_insert_id: 0,
            pending: None,
            cursors: HashMap::new(),
            next_cursor: 1,
        }
    }

    /// Run tasks in queue order until `Finish` arrives or every sender is gone.
    pub(super) fn run(&mut self, receiver: &Receiver<Task>) {
        while let Ok(task) = receiver.recv() {
            self.shared.task_popped();
            trace!(worker = self.id, task = task.kind(), "task received");
            match task {
                Task::Finish => break,
                Task::RunQuery {
                    sql,
                    error_msg,
                    fatal,
                } => self.run_query(&sql, &error_msg, fatal),
                Task::RunQuerySync {
                    sql,
                    error_msg,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.run_query_sync(&sql, &error_msg));
                }
                Task::Prepare {
                    statement_id,
                    sql,
                    respond_to,
                } => {
                    let outcome = self.prepare(statement_id, sql);
                    if let Some(respond_to) = respond_to {
                        let _ = respond_to.send(outcome);
                    }
                }
                Task::ExecuteStatement {
                    statement_id,
                    bind,
                    error_msg,
                    fatal,
                } => self.execute_statement(statement_id, &bind, &error_msg, fatal),
                Task::ExecuteStatementSync {
                    statement_id,
                    bind,
                    error_msg,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.execute_statement_sync(
                        statement_id,
                        &bind,
                        &error_msg,
                    ));
                }
                Task::GetResult { respond_to } => {
                    let _ = respond_to.send(self.get_result());
                }
                Task::FetchRow { cursor, respond_to } => {
                    let _ = respond_to.send(Ok(self.fetch_row(cursor)));
                }
                Task::ReleaseResult { cursor } => {
                    self.cursors.remove(&cursor);
                }
                Task::Commit { respond_to } => {
                    let _ = respond_to.send(self.commit());
                }
                Task::GetAffectedRows {
                    statement_id,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.affected_rows(statement_id));
                }
                Task::CheckAffectedRows {
                    statement_id,
                    error_msg,
                    respond_to,
                } => {
                    let checked = self.affected_rows(statement_id).and_then(|rows| {
                        if rows == 0 {
                            Err(SqlPoolError::NoRowsAffected(error_msg))
                        } else {
                            Ok(rows)
                        }
                    });
                    let _ = respond_to.send(checked);
                }
                Task::GetLastInsertId { respond_to } => {
                    let _ = respond_to.send(Ok(self.last_insert_id));
                }
            }
        }
        debug!(worker = self.id, "worker loop finished");
    }

    fn record(&mut self, outcome: &Outcome) {
        self.need_commit = true;
        self.affected_rows = outcome.affected_rows;
        self.last_insert_id = outcome.last_insert_id;
    }

    fn run_query(&mut self, sql: &str, error_msg: &str, fatal: bool) {
        debug!(worker = self.id, "run query: {sql}");
        let outcome = with_retry(&mut self.conn, self.id, &mut self.need_commit, sql, |conn| {
            conn.query(sql)
        });
        match outcome {
            Ok(outcome) => self.record(&outcome),
            Err(err) => {
                error!(
                    worker = self.id,
                    "{}",
                    describe(error_msg, &format!("could not execute query: {err} ({sql})"))
                );
                if fatal {
                    self.shared.latch().set(err.message(), true);
                }
            }
        }
    }

    fn run_query_sync(&mut self, sql: &str, error_msg: &str) -> Result<(), SqlPoolError> {
        debug!(worker = self.id, "run query with result: {sql}");
        let outcome = with_retry(&mut self.conn, self.id, &mut self.need_commit, sql, |conn| {
            conn.query(sql)
        });
        match outcome {
            Ok(mut outcome) => {
                self.record(&outcome);
                self.pending = Some(Cursor::new(ResultMode::Text, outcome.rows.take()));
                Ok(())
            }
            Err(err) => {
                let message = describe(error_msg, &format!("could not execute query: {err} ({sql})"));
                error!(worker = self.id, "{message}");
                Err(SqlPoolError::ExecutionError(message))
            }
        }
    }

    fn prepare(&mut self, statement_id: StatementId, sql: Arc<str>) -> Result<(), SqlPoolError> {
        if self.statements.contains_key(&statement_id) {
            info!(
                worker = self.id,
                "statement already prepared: {statement_id} ({sql})"
            );
            return Ok(());
        }

        debug!(worker = self.id, "prepare statement {statement_id}: {sql}");
        match self.conn.prepare(&sql) {
            Ok(handle) => {
                self.statements.insert(
                    statement_id,
                    Prepared {
                        sql,
                        handle,
                        affected_rows: 0,
                    },
                );
                Ok(())
            }
            Err(err) => {
                let message = format!("statement preparation failed ({err})");
                error!(worker = self.id, "prepare failed: {err} on query {sql}");
                self.shared.latch().set(message.clone(), true);
                Err(SqlPoolError::ExecutionError(message))
            }
        }
    }

    fn execute_statement(
        &mut self,
        statement_id: StatementId,
        bind: &Bind,
        error_msg: &str,
        fatal: bool,
    ) {
        debug!(worker = self.id, "execute statement {statement_id}");
        let Some(prepared) = self.statements.get_mut(&statement_id) else {
            error!(worker = self.id, "no statement {statement_id} to execute");
            self.shared
                .latch()
                .set(format!("statement {statement_id} not prepared"), false);
            return;
        };

        let outcome = with_retry(
            &mut self.conn,
            self.id,
            &mut self.need_commit,
            &prepared.sql,
            |conn| conn.execute(&mut prepared.handle, bind),
        );
        match outcome {
            Ok(outcome) => {
                prepared.affected_rows = outcome.affected_rows;
                self.record(&outcome);
            }
            Err(err) => {
                error!(
                    worker = self.id,
                    "{}",
                    describe(error_msg, &format!("error while sending prepared query: {err}"))
                );
                if fatal {
                    self.shared.latch().set(err.message(), true);
                }
            }
        }
    }

    fn execute_statement_sync(
        &mut self,
        statement_id: StatementId,
        bind: &Bind,
        error_msg: &str,
    ) -> Result<(), SqlPoolError> {
        debug!(worker = self.id, "execute statement {statement_id} with result");
        let Some(prepared) = self.statements.get_mut(&statement_id) else {
            debug!(worker = self.id, "no statement {statement_id} to execute");
            return Err(SqlPoolError::StatementNotPrepared(statement_id.get()));
        };

        let outcome = with_retry(
            &mut self.conn,
            self.id,
            &mut self.need_commit,
            &prepared.sql,
            |conn| conn.execute(&mut prepared.handle, bind),
        );
        match outcome {
            Ok(mut outcome) => {
                prepared.affected_rows = outcome.affected_rows;
                self.record(&outcome);
                self.pending = Some(Cursor::new(ResultMode::Typed, outcome.rows.take()));
                Ok(())
            }
            Err(err) => Err(SqlPoolError::ExecutionError(describe(
                error_msg,
                &format!("could not execute statement {statement_id}: {err}"),
            ))),
        }
    }

    fn get_result(&mut self) -> Result<ResultHeader, SqlPoolError> {
        let cursor = self
            .pending
            .take()
            .ok_or(SqlPoolError::NoPendingResult(self.id))?;
        let id = self.next_cursor;
        self.next_cursor += 1;
        let header = ResultHeader {
            cursor: id,
            columns: Arc::clone(&cursor.columns),
            rows_count: cursor.rows.len(),
            mode: cursor.mode,
        };
        if !cursor.rows.is_empty() {
            self.cursors.insert(id, cursor);
        }
        Ok(header)
    }

    fn fetch_row(&mut self, cursor: u64) -> Option<Row> {
        let open = self.cursors.get_mut(&cursor)?;
        let row = open.rows.pop_front();
        if open.rows.is_empty() {
            self.cursors.remove(&cursor);
        }
        row
    }

    fn commit(&mut self) -> Result<(), SqlPoolError> {
        if !self.need_commit {
            return Ok(());
        }
        debug!(worker = self.id, "commit");
        let mut attempts = 0;
        loop {
            match self.conn.commit() {
                Ok(()) => {
                    self.need_commit = false;
                    return Ok(());
                }
                Err(err) => {
                    attempts += 1;
                    error!(worker = self.id, "could not commit queries: {err}");
                    if !err.is_retryable() || attempts >= MAX_ATTEMPTS {
                        return Err(SqlPoolError::ExecutionError(format!(
                            "could not commit queries: {err}"
                        )));
                    }
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
    }

    fn affected_rows(&self, statement_id: Option<StatementId>) -> Result<u64, SqlPoolError> {
        match statement_id {
            None => Ok(self.affected_rows),
            Some(id) => self
                .statements
                .get(&id)
                .map(|prepared| prepared.affected_rows)
                .ok_or(SqlPoolError::StatementNotPrepared(id.get())),
        }
    }
}

impl<C: NativeConnection> Drop for Executor<C> {
    fn drop(&mut self) {
        info!(
            worker = self.id,
            "connection finished ({} prepared statements closed)",
            self.statements.len()
        );
    }
}

/// Run `op` until it succeeds, fails for good, or `MAX_ATTEMPTS` is reached.
///
/// Every failure ends the open transaction before the next attempt: a
/// transaction left open after a failure may pin a stale snapshot that makes
/// every later write on this connection fail.
fn with_retry<C, F>(
    conn: &mut C,
    worker: usize,
    need_commit: &mut bool,
    sql: &str,
    mut op: F,
) -> Result<Outcome, NativeError>
where
    C: NativeConnection,
    F: FnMut(&mut C) -> Result<Outcome, NativeError>,
{
    let mut attempts = 0;
    loop {
        match op(conn) {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                attempts += 1;
                end_transaction(conn, worker, need_commit);
                if !err.is_retryable() || attempts >= MAX_ATTEMPTS {
                    return Err(err);
                }
                debug!(
                    worker,
                    "retrying <<{sql}>> after: {err} (attempt {attempts})"
                );
                thread::sleep(RETRY_DELAY);
            }
        }
    }
}

/// Commit whatever the failed query left behind.
fn end_transaction<C: NativeConnection>(conn: &mut C, worker: usize, need_commit: &mut bool) {
    match conn.commit() {
        Ok(()) => *need_commit = false,
        Err(err) => error!(worker, "could not end transaction after a failure: {err}"),
    }
}

fn describe(error_msg: &str, detail: &str) -> String {
    if error_msg.is_empty() {
        detail.to_owned()
    } else {
        format!("{error_msg}: {detail}")
    }
}
