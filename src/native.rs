//! The native database capability driven by the workers.
//!
//! A [`Connector`] opens one [`NativeConnection`] per worker. Connections are
//! only ever touched by the thread of the worker that owns them, so they need
//! to be `Send` but not `Sync`.

use std::fmt;

use crate::config::DatabaseConfig;
use crate::results::RowSet;
use crate::types::Bind;

/// Error reported by a native connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    message: String,
    retryable: bool,
}

impl NativeError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// An error worth retrying as is: deadlock, lock wait timeout, busy database.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for NativeError {}

/// Result of a query execution
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Rows returned by the query, `None` for statements without a result set
    pub rows: Option<RowSet>,
    /// Number of rows affected by the query
    pub affected_rows: u64,
    /// Last insert id generated on this connection
    pub last_insert_id: u64,
}

/// One open database connection.
pub trait NativeConnection: Send + 'static {
    /// Handle of a statement prepared on this connection.
    type Statement: Send + 'static;

    /// Switch autocommit mode. With autocommit off, writes accumulate until
    /// [`NativeConnection::commit`].
    ///
    /// # Errors
    /// Returns the native error if the mode cannot be changed.
    fn set_autocommit(&mut self, enabled: bool) -> Result<(), NativeError>;

    /// Run a raw SQL query. Rows come back in textual form.
    ///
    /// # Errors
    /// Returns the native error if the query fails.
    fn query(&mut self, sql: &str) -> Result<Outcome, NativeError>;

    /// Prepare a statement for later executions.
    ///
    /// # Errors
    /// Returns the native error if the statement cannot be prepared.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, NativeError>;

    /// Execute a prepared statement with the given values. Rows come back typed.
    ///
    /// # Errors
    /// Returns the native error if binding or execution fails.
    fn execute(
        &mut self,
        statement: &mut Self::Statement,
        bind: &Bind,
    ) -> Result<Outcome, NativeError>;

    /// Commit the current transaction.
    ///
    /// # Errors
    /// Returns the native error if the commit fails.
    fn commit(&mut self) -> Result<(), NativeError>;
}

/// Factory of native connections, shared by every worker of a dispatcher.
pub trait Connector: Send + Sync + 'static {
    type Connection: NativeConnection;

    /// Open the connection of worker `worker_id`.
    ///
    /// # Errors
    /// Returns the native error if the database cannot be reached.
    fn connect(
        &self,
        config: &DatabaseConfig,
        worker_id: usize,
    ) -> Result<Self::Connection, NativeError>;
}
