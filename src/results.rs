//! Result sets handed out by the dispatcher.

mod query_result;
mod row;

use serde::Serialize;

pub use query_result::QueryResult;
pub use row::{Row, RowSet};

/// How the values of a result were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMode {
    /// Raw query: every column read in textual form
    Text,
    /// Prepared statement: columns hold typed values
    Typed,
}
