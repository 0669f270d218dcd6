use thiserror::Error;

use crate::native::NativeError;

#[derive(Debug, Error)]
pub enum SqlPoolError {
    #[error(transparent)]
    NativeError(#[from] NativeError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Fatal error on worker {worker}: {message}")]
    Fatal { worker: usize, message: String },

    #[error("Unable to commit transactions: {0}")]
    CommitFailed(String),

    #[error("Statement {0} not prepared")]
    StatementNotPrepared(u32),

    #[error("No worker with id {0}")]
    UnknownWorker(usize),

    #[error("Worker {0} is not available")]
    WorkerUnavailable(usize),

    #[error("No result available on worker {0}")]
    NoPendingResult(usize),

    #[error("No row fetched in result")]
    NoRowFetched,

    #[error("Column {0} out of range")]
    ColumnOutOfRange(usize),

    #[error("Value conversion error: {0}")]
    ConversionError(String),

    #[error("No parameter named {0}")]
    UnknownParameter(String),

    #[error("No rows affected: {0}")]
    NoRowsAffected(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlPoolError {
    /// Whether this error came out of a latched fatal worker error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SqlPoolError::Fatal { .. })
    }
}
