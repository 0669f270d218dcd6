use rusqlite::types::{Value, ValueRef};
use rusqlite::{ErrorCode, Statement, ToSql};

use crate::native::NativeError;
use crate::results::{Row, RowSet};
use crate::types::BindValue;

impl From<rusqlite::Error> for NativeError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                NativeError::retryable(err.to_string())
            }
            _ => NativeError::new(err.to_string()),
        }
    }
}

fn sqlite_value_to_bind_value(value: Value) -> BindValue {
    match value {
        Value::Null => BindValue::Null,
        Value::Integer(i) => BindValue::I64(i),
        Value::Real(f) => BindValue::F64(f),
        Value::Text(s) => BindValue::Text(s),
        Value::Blob(b) => BindValue::Blob(b),
    }
}

fn sqlite_value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

/// Run `stmt` and collect its rows in textual form.
pub(crate) fn build_text_rows(
    stmt: &mut Statement<'_>,
    params: &[&dyn ToSql],
) -> Result<RowSet, NativeError> {
    let columns = column_names(stmt);
    let count = columns.len();
    let mut rows = Vec::new();
    let mut iter = stmt.query(params)?;
    while let Some(row) = iter.next()? {
        let mut values = Vec::with_capacity(count);
        for idx in 0..count {
            values.push(sqlite_value_to_text(row.get_ref(idx)?));
        }
        rows.push(Row::Text(values));
    }
    Ok(RowSet::new(columns, rows))
}

/// Run `stmt` and collect its rows as typed values.
pub(crate) fn build_typed_rows(
    stmt: &mut Statement<'_>,
    params: &[&dyn ToSql],
) -> Result<RowSet, NativeError> {
    let columns = column_names(stmt);
    let count = columns.len();
    let mut rows = Vec::new();
    let mut iter = stmt.query(params)?;
    while let Some(row) = iter.next()? {
        let mut values = Vec::with_capacity(count);
        for idx in 0..count {
            values.push(sqlite_value_to_bind_value(row.get::<_, Value>(idx)?));
        }
        rows.push(Row::Typed(values));
    }
    Ok(RowSet::new(columns, rows))
}
