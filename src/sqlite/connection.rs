use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::native::{Connector, NativeConnection, NativeError, Outcome};
use crate::types::Bind;

use super::params::Params;
use super::query::{build_text_rows, build_typed_rows};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens one `SQLite` connection per worker on the file named by
/// `DatabaseConfig::name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    type Connection = SqliteConnection;

    fn connect(
        &self,
        config: &DatabaseConfig,
        worker_id: usize,
    ) -> Result<SqliteConnection, NativeError> {
        let conn = Connection::open(&config.name)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(
            worker = worker_id,
            "sqlite database '{}' opened ({journal_mode} journal)", config.name
        );
        Ok(SqliteConnection {
            conn,
            autocommit: true,
        })
    }
}

/// A statement prepared on a [`SqliteConnection`].
///
/// The compiled statement lives in the connection's statement cache; the
/// handle only keeps the SQL needed to find it again.
#[derive(Debug, Clone)]
pub struct SqliteStatement {
    sql: Arc<str>,
}

impl SqliteStatement {
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// A rusqlite connection owned by one worker.
///
/// With autocommit off, a transaction is opened before the first statement
/// following a commit and stays open until the next commit.
pub struct SqliteConnection {
    conn: Connection,
    autocommit: bool,
}

impl SqliteConnection {
    fn begin_if_needed(&self) -> Result<(), NativeError> {
        if !self.autocommit && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn last_insert_id(&self) -> u64 {
        u64::try_from(self.conn.last_insert_rowid()).unwrap_or_default()
    }
}

impl NativeConnection for SqliteConnection {
    type Statement = SqliteStatement;

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), NativeError> {
        if enabled && !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        self.autocommit = enabled;
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Outcome, NativeError> {
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare(sql)?;
        if stmt.column_count() > 0 {
            let rows = build_text_rows(&mut stmt, &[])?;
            return Ok(Outcome {
                rows: Some(rows),
                affected_rows: 0,
                last_insert_id: self.last_insert_id(),
            });
        }
        let changed = stmt.execute([])?;
        Ok(Outcome {
            rows: None,
            affected_rows: changed as u64,
            last_insert_id: self.last_insert_id(),
        })
    }

    fn prepare(&mut self, sql: &str) -> Result<SqliteStatement, NativeError> {
        // Compile once so syntax errors surface here; the statement stays cached.
        self.conn.prepare_cached(sql)?;
        Ok(SqliteStatement {
            sql: Arc::from(sql),
        })
    }

    fn execute(
        &mut self,
        statement: &mut SqliteStatement,
        bind: &Bind,
    ) -> Result<Outcome, NativeError> {
        let params = Params::convert(bind)?;
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare_cached(&statement.sql)?;
        if stmt.column_count() > 0 {
            let rows = build_typed_rows(&mut stmt, &params.as_refs())?;
            return Ok(Outcome {
                rows: Some(rows),
                affected_rows: 0,
                last_insert_id: self.last_insert_id(),
            });
        }
        let changed = stmt.execute(&params.as_refs()[..])?;
        Ok(Outcome {
            rows: None,
            affected_rows: changed as u64,
            last_insert_id: self.last_insert_id(),
        })
    }

    fn commit(&mut self) -> Result<(), NativeError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}
