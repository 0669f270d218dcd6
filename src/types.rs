use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SqlPoolError;
use crate::translation::BindMapping;

/// Identifier of a statement prepared on every worker of a dispatcher.
///
/// Ids start at 1 and are never reused by the dispatcher that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatementId(pub(crate) u32);

impl StatementId {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A statement prepared from SQL written with `:name` placeholders.
///
/// ```rust
/// use broker_sql_pool::prelude::*;
///
/// # async fn run(dispatcher: &Dispatcher) -> Result<(), SqlPoolError> {
/// let update = dispatcher
///     .prepare_named_query_sync("UPDATE hosts SET name = :name WHERE host_id = :host_id")
///     .await?;
/// let mut bind = update.bind();
/// bind.set_value_as_str_by_name(":name", "central")?;
/// bind.set_value_as_u32_by_name(":host_id", 12)?;
/// dispatcher.run_statement(update.id(), bind, "cannot rename host", false, None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NamedStatement {
    id: StatementId,
    mapping: Arc<BindMapping>,
}

impl NamedStatement {
    pub(crate) fn new(id: StatementId, mapping: BindMapping) -> Self {
        Self {
            id,
            mapping: Arc::new(mapping),
        }
    }

    #[must_use]
    pub fn id(&self) -> StatementId {
        self.id
    }

    #[must_use]
    pub fn mapping(&self) -> &BindMapping {
        &self.mapping
    }

    /// A bind with one NULL per parameter, accepting values by name.
    #[must_use]
    pub fn bind(&self) -> Bind {
        Bind {
            values: vec![BindValue::Null; self.mapping.len()],
            names: Some(Arc::clone(&self.mapping)),
        }
    }
}

/// A typed value bound to a prepared statement parameter or read back from a
/// prepared statement row.
///
/// ```rust
/// use broker_sql_pool::prelude::*;
///
/// let mut bind = Bind::with_size(3);
/// bind.set_value_as_u32(0, 42);
/// bind.set_value_as_str(1, "host-1");
/// bind.set_value_as_f64(2, f64::NAN);
/// assert!(bind.value(2).is_some_and(BindValue::is_null));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BindValue {
    /// NULL value
    Null,
    /// Boolean value, stored as a tiny integer by most backends
    Bool(bool),
    /// Signed 32-bit integer
    I32(i32),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 64-bit integer
    I64(i64),
    /// Unsigned 64-bit integer
    U64(u64),
    /// Single precision float
    F32(f32),
    /// Double precision float
    F64(f64),
    /// Text value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

impl BindValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Decode the value as a boolean. NULL reads as `false`. Text is read as
    /// an integer first, then as `true` / `false`.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConversionError` if the value is neither numeric
    /// nor a boolean literal.
    pub fn as_bool(&self) -> Result<bool, SqlPoolError> {
        match self {
            Self::Bool(value) => Ok(*value),
            Self::Text(text) => parse_text::<i64>(text, "bool")
                .map(|value| value != 0)
                .or_else(|_| parse_text::<bool>(text, "bool")),
            Self::F32(value) => Ok(*value != 0.0),
            Self::F64(value) => Ok(*value != 0.0),
            other => other.as_i64().map(|value| value != 0),
        }
    }

    /// Decode the value as a signed 64-bit integer. NULL reads as 0.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConversionError` if the value is not an integer or
    /// does not fit.
    pub fn as_i64(&self) -> Result<i64, SqlPoolError> {
        match self {
            Self::Null => Ok(0),
            Self::Bool(value) => Ok(i64::from(*value)),
            Self::I32(value) => Ok(i64::from(*value)),
            Self::U32(value) => Ok(i64::from(*value)),
            Self::I64(value) => Ok(*value),
            Self::U64(value) => i64::try_from(*value).map_err(|_| overflow(self, "i64")),
            Self::Text(text) => parse_text(text, "i64"),
            Self::F32(_) | Self::F64(_) | Self::Blob(_) => Err(mismatch(self, "i64")),
        }
    }

    /// Decode the value as a signed 32-bit integer. NULL reads as 0.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConversionError` if the value is not an integer or
    /// does not fit.
    pub fn as_i32(&self) -> Result<i32, SqlPoolError> {
        match self {
            Self::I32(value) => Ok(*value),
            Self::Text(text) => parse_text(text, "i32"),
            other => {
                let wide = other.as_i64()?;
                i32::try_from(wide).map_err(|_| overflow(other, "i32"))
            }
        }
    }

    /// Decode the value as an unsigned 32-bit integer. NULL reads as 0.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConversionError` if the value is not an integer or
    /// does not fit.
    pub fn as_u32(&self) -> Result<u32, SqlPoolError> {
        match self {
            Self::U32(value) => Ok(*value),
            Self::Text(text) => parse_text(text, "u32"),
            other => {
                let wide = other.as_i64()?;
                u32::try_from(wide).map_err(|_| overflow(other, "u32"))
            }
        }
    }

    /// Decode the value as an unsigned 64-bit integer. NULL reads as 0.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConversionError` if the value is not an integer or
    /// does not fit.
    pub fn as_u64(&self) -> Result<u64, SqlPoolError> {
        match self {
            Self::U64(value) => Ok(*value),
            Self::Text(text) => parse_text(text, "u64"),
            other => {
                let wide = other.as_i64()?;
                u64::try_from(wide).map_err(|_| overflow(other, "u64"))
            }
        }
    }

    /// Decode the value as a double. NULL reads as 0.0.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConversionError` for text that is not a number or
    /// for blobs.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Result<f64, SqlPoolError> {
        match self {
            Self::F64(value) => Ok(*value),
            Self::F32(value) => Ok(f64::from(*value)),
            Self::U64(value) => Ok(*value as f64),
            Self::Text(text) => parse_text(text, "f64"),
            Self::Blob(_) => Err(mismatch(self, "f64")),
            other => other.as_i64().map(|value| value as f64),
        }
    }

    /// Decode the value as a float. NULL reads as 0.0.
    ///
    /// # Errors
    /// Same as [`BindValue::as_f64`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_f32(&self) -> Result<f32, SqlPoolError> {
        match self {
            Self::F32(value) => Ok(*value),
            Self::Text(text) => parse_text(text, "f32"),
            other => other.as_f64().map(|value| value as f32),
        }
    }

    /// Render the value as text. NULL reads as an empty string.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(value) => u8::from(*value).to_string(),
            Self::I32(value) => value.to_string(),
            Self::U32(value) => value.to_string(),
            Self::I64(value) => value.to_string(),
            Self::U64(value) => value.to_string(),
            Self::F32(value) => value.to_string(),
            Self::F64(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Parse a textual column with Rust's locale-independent parsers.
pub(crate) fn parse_text<T: std::str::FromStr>(text: &str, target: &str) -> Result<T, SqlPoolError> {
    text.trim().parse::<T>().map_err(|_| {
        SqlPoolError::ConversionError(format!("cannot read '{text}' as {target}"))
    })
}

fn overflow(value: &BindValue, target: &str) -> SqlPoolError {
    SqlPoolError::ConversionError(format!("{value:?} does not fit in {target}"))
}

fn mismatch(value: &BindValue, target: &str) -> SqlPoolError {
    SqlPoolError::ConversionError(format!("{value:?} is not convertible to {target}"))
}

/// Ordered set of values bound to the parameters of a prepared statement.
///
/// Setters grow the set when the index is past its end; the gap is filled
/// with NULLs. A bind made by [`NamedStatement::bind`] also accepts values by
/// parameter name through the `*_by_name` setters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bind {
    values: Vec<BindValue>,
    #[serde(skip)]
    names: Option<Arc<BindMapping>>,
}

impl Bind {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bind with `size` NULL parameters.
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        Self {
            values: vec![BindValue::Null; size],
            names: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[BindValue] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, index: usize) -> Option<&BindValue> {
        self.values.get(index)
    }

    pub fn set_value(&mut self, index: usize, value: BindValue) {
        if index >= self.values.len() {
            self.values.resize(index + 1, BindValue::Null);
        }
        self.values[index] = value;
    }

    pub fn set_value_as_null(&mut self, index: usize) {
        self.set_value(index, BindValue::Null);
    }

    pub fn set_value_as_bool(&mut self, index: usize, value: bool) {
        self.set_value(index, BindValue::Bool(value));
    }

    pub fn set_value_as_i32(&mut self, index: usize, value: i32) {
        self.set_value(index, BindValue::I32(value));
    }

    pub fn set_value_as_u32(&mut self, index: usize, value: u32) {
        self.set_value(index, BindValue::U32(value));
    }

    pub fn set_value_as_i64(&mut self, index: usize, value: i64) {
        self.set_value(index, BindValue::I64(value));
    }

    pub fn set_value_as_u64(&mut self, index: usize, value: u64) {
        self.set_value(index, BindValue::U64(value));
    }

    /// Infinite and NaN floats are stored as NULL.
    pub fn set_value_as_f32(&mut self, index: usize, value: f32) {
        if value.is_finite() {
            self.set_value(index, BindValue::F32(value));
        } else {
            self.set_value_as_null(index);
        }
    }

    /// Infinite and NaN doubles are stored as NULL.
    pub fn set_value_as_f64(&mut self, index: usize, value: f64) {
        if value.is_finite() {
            self.set_value(index, BindValue::F64(value));
        } else {
            self.set_value_as_null(index);
        }
    }

    pub fn set_value_as_str(&mut self, index: usize, value: impl Into<String>) {
        self.set_value(index, BindValue::Text(value.into()));
    }

    fn set_by_name(
        &mut self,
        name: &str,
        mut set: impl FnMut(&mut Self, usize),
    ) -> Result<(), SqlPoolError> {
        let positions = self
            .names
            .as_ref()
            .map(|names| names.positions(name))
            .unwrap_or_default();
        if positions.is_empty() {
            return Err(SqlPoolError::UnknownParameter(name.to_owned()));
        }
        for index in positions {
            set(self, index);
        }
        Ok(())
    }

    /// Set every parameter called `name` (`:name` is accepted too).
    ///
    /// # Errors
    /// Returns `SqlPoolError::UnknownParameter` if the statement has no such
    /// parameter, or if this bind does not come from a [`NamedStatement`].
    pub fn set_value_by_name(&mut self, name: &str, value: BindValue) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value(index, value.clone()))
    }

    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_null_by_name(&mut self, name: &str) -> Result<(), SqlPoolError> {
        self.set_by_name(name, Self::set_value_as_null)
    }

    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_bool_by_name(&mut self, name: &str, value: bool) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value_as_bool(index, value))
    }

    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_i32_by_name(&mut self, name: &str, value: i32) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value_as_i32(index, value))
    }

    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_u32_by_name(&mut self, name: &str, value: u32) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value_as_u32(index, value))
    }

    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_i64_by_name(&mut self, name: &str, value: i64) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value_as_i64(index, value))
    }

    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_u64_by_name(&mut self, name: &str, value: u64) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value_as_u64(index, value))
    }

    /// Infinite and NaN floats are stored as NULL.
    ///
    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_f32_by_name(&mut self, name: &str, value: f32) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value_as_f32(index, value))
    }

    /// Infinite and NaN doubles are stored as NULL.
    ///
    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_f64_by_name(&mut self, name: &str, value: f64) -> Result<(), SqlPoolError> {
        self.set_by_name(name, |bind, index| bind.set_value_as_f64(index, value))
    }

    /// # Errors
    /// Same as [`Bind::set_value_by_name`].
    pub fn set_value_as_str_by_name(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), SqlPoolError> {
        let value = value.into();
        self.set_by_name(name, |bind, index| bind.set_value_as_str(index, value.clone()))
    }
}

impl From<Vec<BindValue>> for Bind {
    fn from(values: Vec<BindValue>) -> Self {
        Self {
            values,
            names: None,
        }
    }
}

impl FromIterator<BindValue> for Bind {
    fn from_iter<I: IntoIterator<Item = BindValue>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            names: None,
        }
    }
}
