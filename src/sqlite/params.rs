use rusqlite::ToSql;
use rusqlite::types::Value;

use crate::native::NativeError;
use crate::types::{Bind, BindValue};

/// Convert a single `BindValue` to a rusqlite `Value`.
///
/// # Errors
/// Fails for unsigned values beyond the range of an SQLite integer.
pub(crate) fn bind_value_to_sqlite_value(value: &BindValue) -> Result<Value, NativeError> {
    Ok(match value {
        BindValue::Null => Value::Null,
        BindValue::Bool(b) => Value::Integer(i64::from(*b)),
        BindValue::I32(i) => Value::Integer(i64::from(*i)),
        BindValue::U32(u) => Value::Integer(i64::from(*u)),
        BindValue::I64(i) => Value::Integer(*i),
        BindValue::U64(u) => Value::Integer(i64::try_from(*u).map_err(|_| {
            NativeError::new(format!("value {u} does not fit an SQLite integer"))
        })?),
        BindValue::F32(f) => Value::Real(f64::from(*f)),
        BindValue::F64(f) => Value::Real(*f),
        BindValue::Text(s) => Value::Text(s.clone()),
        BindValue::Blob(bytes) => Value::Blob(bytes.clone()),
    })
}

/// `SQLite` parameters converted from a [`Bind`].
pub(crate) struct Params(Vec<Value>);

impl Params {
    pub(crate) fn convert(bind: &Bind) -> Result<Self, NativeError> {
        bind.values()
            .iter()
            .map(bind_value_to_sqlite_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Params)
    }

    pub(crate) fn as_refs(&self) -> Vec<&dyn ToSql> {
        self.0.iter().map(|v| v as &dyn ToSql).collect()
    }
}
