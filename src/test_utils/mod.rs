/// Scriptable in-memory connector used to exercise the dispatcher without a
/// database.
pub mod mock;

pub use mock::{MockConnection, MockConnector, MockEvent, MockJournal, MockOp};
