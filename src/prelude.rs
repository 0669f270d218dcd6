//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to configure a
//! dispatcher, run queries and read their results.

pub use crate::config::{DatabaseConfig, DatabaseType};
pub use crate::dispatcher::{Dispatcher, PoolStats};
pub use crate::error::SqlPoolError;
pub use crate::latch::LatchedError;
pub use crate::results::QueryResult;
pub use crate::types::{Bind, BindValue, NamedStatement, StatementId};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteConnector;
