use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::native::{Connector, NativeConnection, NativeError, Outcome};
use crate::results::{Row, RowSet};
use crate::types::{Bind, BindValue};

/// Operation seen by a mock connection.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOp {
    Connect,
    Autocommit(bool),
    Query(String),
    Prepare(String),
    Execute { sql: String, values: Vec<BindValue> },
    Commit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockEvent {
    pub worker: usize,
    pub op: MockOp,
}

/// Ordered record of every operation run by the connections of one connector.
#[derive(Debug, Clone, Default)]
pub struct MockJournal {
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl MockJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<MockEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, worker: usize, op: MockOp) {
        self.lock().push(MockEvent { worker, op });
    }

    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().clone()
    }

    /// Operations run by `worker`, in order.
    #[must_use]
    pub fn ops(&self, worker: usize) -> Vec<MockOp> {
        self.lock()
            .iter()
            .filter(|event| event.worker == worker)
            .map(|event| event.op.clone())
            .collect()
    }

    /// SQL text of the queries and statement executions run by `worker`.
    #[must_use]
    pub fn statements(&self, worker: usize) -> Vec<String> {
        self.ops(worker)
            .into_iter()
            .filter_map(|op| match op {
                MockOp::Query(sql) | MockOp::Execute { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// Native commits run by `worker`.
    #[must_use]
    pub fn commits(&self, worker: usize) -> usize {
        self.ops(worker)
            .iter()
            .filter(|op| **op == MockOp::Commit)
            .count()
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    fail_connect: Option<usize>,
    fail_prepare: Option<usize>,
    fail_commit: Option<usize>,
    fail_queries: Vec<String>,
    no_rows_affected: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    delay: Duration,
    busy_commits: Arc<AtomicUsize>,
    busy_executes: Arc<AtomicUsize>,
}

/// Connector whose connections succeed or fail as scripted and record every
/// call in a shared [`MockJournal`].
///
/// Queries starting with `SELECT` return the scripted rows. `INSERT`s produce
/// last insert ids `worker * 1000 + n`, `n` counting inserts on that worker.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Script>,
    journal: MockJournal,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::make_mut(&mut self.script)
    }

    /// Worker `worker` cannot connect.
    #[must_use]
    pub fn fail_connect_on(mut self, worker: usize) -> Self {
        self.script_mut().fail_connect = Some(worker);
        self
    }

    /// Every prepare on worker `worker` fails.
    #[must_use]
    pub fn fail_prepare_on(mut self, worker: usize) -> Self {
        self.script_mut().fail_prepare = Some(worker);
        self
    }

    /// Every commit on worker `worker` fails.
    #[must_use]
    pub fn fail_commit_on(mut self, worker: usize) -> Self {
        self.script_mut().fail_commit = Some(worker);
        self
    }

    /// The next `count` commits, on any worker, fail with a retryable error.
    #[must_use]
    pub fn busy_commits(mut self, count: usize) -> Self {
        self.script_mut().busy_commits = Arc::new(AtomicUsize::new(count));
        self
    }

    /// The next `count` queries or statement executions, on any worker, fail
    /// with a retryable error.
    #[must_use]
    pub fn busy_executes(mut self, count: usize) -> Self {
        self.script_mut().busy_executes = Arc::new(AtomicUsize::new(count));
        self
    }

    /// Queries and executions whose SQL contains `pattern` fail.
    #[must_use]
    pub fn fail_queries_containing(mut self, pattern: impl Into<String>) -> Self {
        self.script_mut().fail_queries.push(pattern.into());
        self
    }

    /// Queries and executions whose SQL contains `pattern` affect no row.
    #[must_use]
    pub fn no_rows_affected_by(mut self, pattern: impl Into<String>) -> Self {
        self.script_mut().no_rows_affected.push(pattern.into());
        self
    }

    /// Rows returned by `SELECT` queries.
    #[must_use]
    pub fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<Option<String>>>) -> Self {
        let script = self.script_mut();
        script.columns = columns.iter().map(|c| (*c).to_string()).collect();
        script.rows = rows;
        self
    }

    /// Time spent by every query and execution.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script_mut().delay = delay;
        self
    }

    #[must_use]
    pub fn journal(&self) -> MockJournal {
        self.journal.clone()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(
        &self,
        _config: &DatabaseConfig,
        worker_id: usize,
    ) -> Result<MockConnection, NativeError> {
        self.journal.push(worker_id, MockOp::Connect);
        if self.script.fail_connect == Some(worker_id) {
            return Err(NativeError::new("connection refused"));
        }
        Ok(MockConnection {
            worker: worker_id,
            script: Arc::clone(&self.script),
            journal: self.journal.clone(),
            inserts: 0,
        })
    }
}

pub struct MockConnection {
    worker: usize,
    script: Arc<Script>,
    journal: MockJournal,
    inserts: u64,
}

impl MockConnection {
    fn run(&mut self, sql: &str, typed: bool) -> Result<Outcome, NativeError> {
        if !self.script.delay.is_zero() {
            thread::sleep(self.script.delay);
        }
        if take_one(&self.script.busy_executes) {
            return Err(NativeError::retryable("database is locked"));
        }
        if self.script.fail_queries.iter().any(|p| sql.contains(p.as_str())) {
            return Err(NativeError::new(format!("query refused: {sql}")));
        }

        let keyword = sql.trim_start().to_ascii_uppercase();
        if keyword.starts_with("SELECT") {
            let rows = self
                .script
                .rows
                .iter()
                .map(|values| {
                    if typed {
                        Row::Typed(
                            values
                                .iter()
                                .map(|v| v.clone().map_or(BindValue::Null, BindValue::Text))
                                .collect(),
                        )
                    } else {
                        Row::Text(values.clone())
                    }
                })
                .collect();
            return Ok(Outcome {
                rows: Some(RowSet::new(self.script.columns.clone(), rows)),
                ..Outcome::default()
            });
        }

        let affected_rows = u64::from(
            !self
                .script
                .no_rows_affected
                .iter()
                .any(|p| sql.contains(p.as_str())),
        );
        let last_insert_id = if keyword.starts_with("INSERT") {
            self.inserts += 1;
            self.worker as u64 * 1000 + self.inserts
        } else {
            0
        };
        Ok(Outcome {
            rows: None,
            affected_rows,
            last_insert_id,
        })
    }
}

impl NativeConnection for MockConnection {
    type Statement = String;

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), NativeError> {
        self.journal.push(self.worker, MockOp::Autocommit(enabled));
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Outcome, NativeError> {
        self.journal.push(self.worker, MockOp::Query(sql.to_owned()));
        self.run(sql, false)
    }

    fn prepare(&mut self, sql: &str) -> Result<String, NativeError> {
        self.journal.push(self.worker, MockOp::Prepare(sql.to_owned()));
        if self.script.fail_prepare == Some(self.worker) {
            return Err(NativeError::new(format!("cannot prepare '{sql}'")));
        }
        Ok(sql.to_owned())
    }

    fn execute(&mut self, statement: &mut String, bind: &Bind) -> Result<Outcome, NativeError> {
        self.journal.push(
            self.worker,
            MockOp::Execute {
                sql: statement.clone(),
                values: bind.values().to_vec(),
            },
        );
        self.run(statement, true)
    }

    fn commit(&mut self) -> Result<(), NativeError> {
        self.journal.push(self.worker, MockOp::Commit);
        if take_one(&self.script.busy_commits) {
            return Err(NativeError::retryable("database is locked"));
        }
        if self.script.fail_commit == Some(self.worker) {
            return Err(NativeError::new("commit refused"));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
        .is_ok()
}
