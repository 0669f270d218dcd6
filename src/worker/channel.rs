use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::SqlPoolError;
use crate::results::{ResultMode, Row};
use crate::types::{Bind, StatementId};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SqlPoolError>>;

/// Shape of a result set handed out by `GetResult`; the rows stay on the
/// worker until fetched.
#[derive(Debug)]
pub(crate) struct ResultHeader {
    pub(crate) cursor: u64,
    pub(crate) columns: Arc<Vec<String>>,
    pub(crate) rows_count: usize,
    pub(crate) mode: ResultMode,
}

pub(crate) enum Task {
    RunQuery {
        sql: String,
        error_msg: String,
        fatal: bool,
    },
    RunQuerySync {
        sql: String,
        error_msg: String,
        respond_to: Reply<()>,
    },
    Prepare {
        statement_id: StatementId,
        sql: Arc<str>,
        respond_to: Option<Reply<()>>,
    },
    ExecuteStatement {
        statement_id: StatementId,
        bind: Bind,
        error_msg: String,
        fatal: bool,
    },
    ExecuteStatementSync {
        statement_id: StatementId,
        bind: Bind,
        error_msg: String,
        respond_to: Reply<()>,
    },
    GetResult {
        respond_to: Reply<ResultHeader>,
    },
    FetchRow {
        cursor: u64,
        respond_to: Reply<Option<Row>>,
    },
    ReleaseResult {
        cursor: u64,
    },
    Commit {
        respond_to: Reply<()>,
    },
    GetAffectedRows {
        statement_id: Option<StatementId>,
        respond_to: Reply<u64>,
    },
    CheckAffectedRows {
        statement_id: Option<StatementId>,
        error_msg: String,
        respond_to: Reply<u64>,
    },
    GetLastInsertId {
        respond_to: Reply<u64>,
    },
    Finish,
}

impl Task {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Task::RunQuery { .. } => "RUN",
            Task::RunQuerySync { .. } => "RUN with result",
            Task::Prepare { .. } => "PREPARE",
            Task::ExecuteStatement { .. } => "STATEMENT",
            Task::ExecuteStatementSync { .. } => "STATEMENT with result",
            Task::GetResult { .. } => "GET_RESULT",
            Task::FetchRow { .. } => "FETCH_ROW",
            Task::ReleaseResult { .. } => "RELEASE_RESULT",
            Task::Commit { .. } => "COMMIT",
            Task::GetAffectedRows { .. } => "AFFECTED_ROWS",
            Task::CheckAffectedRows { .. } => "CHECK_AFFECTED_ROWS",
            Task::GetLastInsertId { .. } => "LAST_INSERT_ID",
            Task::Finish => "FINISH",
        }
    }
}
