use std::sync::Arc;

use crate::error::SqlPoolError;
use crate::worker::{ResultHeader, Task, TaskSender};

use super::{ResultMode, Row};

/// Handle on a result set still held by the worker that produced it.
///
/// Rows are pulled one at a time with `Dispatcher::fetch_row`; the values of
/// the current row are read through the `value_as_*` accessors. Dropping the
/// handle releases the rows left on the worker.
#[derive(Debug)]
pub struct QueryResult {
    worker_id: usize,
    cursor: u64,
    columns: Arc<Vec<String>>,
    rows_count: usize,
    mode: ResultMode,
    row: Option<Row>,
    owner: Option<TaskSender>,
}

impl QueryResult {
    pub(crate) fn new(worker_id: usize, header: ResultHeader, owner: Option<TaskSender>) -> Self {
        Self {
            worker_id,
            cursor: header.cursor,
            columns: header.columns,
            rows_count: header.rows_count,
            mode: header.mode,
            row: None,
            owner,
        }
    }

    pub(crate) fn cursor(&self) -> u64 {
        self.cursor
    }

    pub(crate) fn set_row(&mut self, row: Option<Row>) {
        self.row = row;
    }

    /// The worker holding the rows of this result.
    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    #[must_use]
    pub fn mode(&self) -> ResultMode {
        self.mode
    }

    /// `true` when the query produced no row at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows_count == 0
    }

    /// Number of rows produced by the query, fetched or not.
    #[must_use]
    pub fn get_rows_count(&self) -> usize {
        self.rows_count
    }

    #[must_use]
    pub fn columns_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// The last fetched row, if any.
    #[must_use]
    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    fn current(&self) -> Result<&Row, SqlPoolError> {
        self.row.as_ref().ok_or(SqlPoolError::NoRowFetched)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` before the first successful fetch,
    /// or the column access error.
    pub fn value_is_null(&self, index: usize) -> Result<bool, SqlPoolError> {
        self.current()?.value_is_null(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the conversion error.
    pub fn value_as_bool(&self, index: usize) -> Result<bool, SqlPoolError> {
        self.current()?.value_as_bool(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the conversion error.
    pub fn value_as_i32(&self, index: usize) -> Result<i32, SqlPoolError> {
        self.current()?.value_as_i32(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the conversion error.
    pub fn value_as_u32(&self, index: usize) -> Result<u32, SqlPoolError> {
        self.current()?.value_as_u32(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the conversion error.
    pub fn value_as_i64(&self, index: usize) -> Result<i64, SqlPoolError> {
        self.current()?.value_as_i64(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the conversion error.
    pub fn value_as_u64(&self, index: usize) -> Result<u64, SqlPoolError> {
        self.current()?.value_as_u64(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the conversion error.
    pub fn value_as_f32(&self, index: usize) -> Result<f32, SqlPoolError> {
        self.current()?.value_as_f32(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the conversion error.
    pub fn value_as_f64(&self, index: usize) -> Result<f64, SqlPoolError> {
        self.current()?.value_as_f64(index)
    }

    /// # Errors
    /// Returns `SqlPoolError::NoRowFetched` or the column access error.
    pub fn value_as_str(&self, index: usize) -> Result<String, SqlPoolError> {
        self.current()?.value_as_str(index)
    }
}

impl Drop for QueryResult {
    fn drop(&mut self) {
        if self.rows_count == 0 {
            return;
        }
        if let Some(owner) = &self.owner {
            // The worker may already be gone, in which case nothing is left to release.
            let _ = owner.enqueue(Task::ReleaseResult {
                cursor: self.cursor,
            });
        }
    }
}
