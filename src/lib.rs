//! Asynchronous SQL execution layer.
//!
//! A [`Dispatcher`] owns a fixed set of connection workers. Each worker is an
//! OS thread owning one native connection and running the tasks pushed on its
//! queue strictly in order. Callers either fire queries without waiting
//! (round-robin or pinned to a worker) or wait for a reply, batch
//! asynchronous writes into transactions committed on every worker at once,
//! and read per-worker latched errors.
//!
//! ```no_run
//! use broker_sql_pool::prelude::*;
//!
//! # async fn run() -> Result<(), SqlPoolError> {
//! let config = DatabaseConfig::builder("/var/lib/broker/storage.db")
//!     .connections(3)
//!     .queries_per_transaction(100)
//!     .finish()?;
//! let dispatcher = Dispatcher::connect(config, SqliteConnector).await?;
//!
//! let insert = dispatcher.prepare_query_sync("INSERT INTO hosts (host_id, name) VALUES (?, ?)").await?;
//! let mut bind = Bind::with_size(2);
//! bind.set_value_as_u32(0, 12);
//! bind.set_value_as_str(1, "central");
//! dispatcher.run_statement(insert, bind, "cannot insert host", false, None).await?;
//!
//! dispatcher.commit().await?;
//! dispatcher.finish();
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod latch;
pub mod native;
pub mod results;
pub mod translation;
pub mod types;

mod worker;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{DatabaseConfig, DatabaseConfigBuilder, DatabaseType};
pub use dispatcher::{Dispatcher, PoolStats, WorkerStats};
pub use error::SqlPoolError;
pub use latch::{ErrorLatch, LatchedError};
pub use native::{Connector, NativeConnection, NativeError, Outcome};
pub use results::{QueryResult, ResultMode, Row, RowSet};
pub use translation::{BindMapping, translate_named_placeholders};
pub use types::{Bind, BindValue, NamedStatement, StatementId};
pub use worker::WorkerState;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteConnector, SqliteStatement};
