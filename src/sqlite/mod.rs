// SQLite backend - native connections driven by the workers
//
// - connection: connector, connection and prepared statement handle
// - params: bind values to SQLite values
// - query: SQLite rows and errors to crate types

mod connection;
mod params;
mod query;

pub use connection::{SqliteConnection, SqliteConnector, SqliteStatement};
