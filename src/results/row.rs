use std::str::FromStr;
use std::sync::Arc;

use crate::error::SqlPoolError;
use crate::types::{BindValue, parse_text};

/// One fetched row.
///
/// Rows produced by a raw query hold the textual form of each column (`None`
/// for NULL); rows produced by a prepared statement hold typed values.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// Raw textual row
    Text(Vec<Option<String>>),
    /// Typed row decoded from a prepared statement result
    Typed(Vec<BindValue>),
}

impl Row {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Row::Text(columns) => columns.len(),
            Row::Typed(columns) => columns.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tells if the column holds NULL.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` for an unknown column.
    pub fn value_is_null(&self, index: usize) -> Result<bool, SqlPoolError> {
        match self {
            Row::Text(columns) => Ok(text_column(columns, index)?.is_none()),
            Row::Typed(columns) => Ok(typed_column(columns, index)?.is_null()),
        }
    }

    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` or `SqlPoolError::ConversionError`.
    pub fn value_as_bool(&self, index: usize) -> Result<bool, SqlPoolError> {
        match self {
            Row::Text(columns) => match text_column(columns, index)? {
                None => Ok(false),
                Some(text) => parse_text::<i64>(text, "bool")
                    .map(|value| value != 0)
                    .or_else(|_| parse_text::<bool>(text, "bool")),
            },
            Row::Typed(columns) => typed_column(columns, index)?.as_bool(),
        }
    }

    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` or `SqlPoolError::ConversionError`.
    pub fn value_as_i32(&self, index: usize) -> Result<i32, SqlPoolError> {
        self.decode(index, "i32", BindValue::as_i32)
    }

    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` or `SqlPoolError::ConversionError`.
    pub fn value_as_u32(&self, index: usize) -> Result<u32, SqlPoolError> {
        self.decode(index, "u32", BindValue::as_u32)
    }

    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` or `SqlPoolError::ConversionError`.
    pub fn value_as_i64(&self, index: usize) -> Result<i64, SqlPoolError> {
        self.decode(index, "i64", BindValue::as_i64)
    }

    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` or `SqlPoolError::ConversionError`.
    pub fn value_as_u64(&self, index: usize) -> Result<u64, SqlPoolError> {
        self.decode(index, "u64", BindValue::as_u64)
    }

    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` or `SqlPoolError::ConversionError`.
    pub fn value_as_f32(&self, index: usize) -> Result<f32, SqlPoolError> {
        self.decode(index, "f32", BindValue::as_f32)
    }

    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` or `SqlPoolError::ConversionError`.
    pub fn value_as_f64(&self, index: usize) -> Result<f64, SqlPoolError> {
        self.decode(index, "f64", BindValue::as_f64)
    }

    /// NULL reads as an empty string.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ColumnOutOfRange` for an unknown column.
    pub fn value_as_str(&self, index: usize) -> Result<String, SqlPoolError> {
        match self {
            Row::Text(columns) => Ok(text_column(columns, index)?
                .map(str::to_owned)
                .unwrap_or_default()),
            Row::Typed(columns) => Ok(typed_column(columns, index)?.as_string()),
        }
    }

    fn decode<T>(
        &self,
        index: usize,
        target: &str,
        typed: impl FnOnce(&BindValue) -> Result<T, SqlPoolError>,
    ) -> Result<T, SqlPoolError>
    where
        T: FromStr + Default,
    {
        match self {
            Row::Text(columns) => match text_column(columns, index)? {
                None => Ok(T::default()),
                Some(text) => parse_text(text, target),
            },
            Row::Typed(columns) => typed(typed_column(columns, index)?),
        }
    }
}

fn text_column(columns: &[Option<String>], index: usize) -> Result<Option<&str>, SqlPoolError> {
    columns
        .get(index)
        .map(Option::as_deref)
        .ok_or(SqlPoolError::ColumnOutOfRange(index))
}

fn typed_column(columns: &[BindValue], index: usize) -> Result<&BindValue, SqlPoolError> {
    columns.get(index).ok_or(SqlPoolError::ColumnOutOfRange(index))
}

/// Rows produced by one native execution, with their column names.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    /// Column names shared by all rows
    pub columns: Arc<Vec<String>>,
    /// The rows, in the order returned by the database
    pub rows: Vec<Row>,
}

impl RowSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows,
        }
    }
}
