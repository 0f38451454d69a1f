//! A typed, higher-level wrapper around an embedded SQLite engine.
//!
//! `quarry` mediates between application code and the raw C library: it
//! prepares and caches statements, runs them under rigorously serialized
//! access, manages transactions and savepoints with aborted-transaction
//! detection, introspects the database schema through a version-gated cache
//! spanning every attached schema, registers custom scalar and aggregate
//! functions and collations, observes transaction lifecycle events, and
//! supports cooperative suspension so the process can relinquish file locks
//! quickly under OS pressure.
//!
//! A [`Connection`] owns its native handle exclusively and must only be used
//! from the thread that opened it; run one connection per thread for
//! parallelism and let SQLite's locking coordinate them.
//!
//! ```no_run
//! use quarry::{params, Config, Connection, TransactionCompletion};
//!
//! # fn main() -> quarry::Result<()> {
//! let mut conn = Connection::open("players.db", Config::new())?;
//!
//! conn.execute_batch("CREATE TABLE IF NOT EXISTS player(name TEXT, score INTEGER)")?;
//!
//! conn.in_transaction(None, |conn| {
//!     conn.execute("INSERT INTO player VALUES (?, ?)", params!["alice", 92])?;
//!     conn.execute("INSERT INTO player VALUES (?, ?)", params!["bob", 87])?;
//!     Ok(TransactionCompletion::Commit)
//! })?;
//!
//! let best: Option<String> =
//!     conn.query_value("SELECT name FROM player ORDER BY score DESC", params![])?;
//! # let _ = best;
//! # Ok(())
//! # }
//! ```

mod arguments;
mod config;
mod connection;
mod error;
mod logger;
mod region;
mod row;
mod schema;
mod statement;
mod value;

pub use arguments::Arguments;
pub use config::{BusyMode, BusyTimeout, Config, LogSettings};
pub use connection::authorizer::{AuthAction, Authorization, StatementAuthorizer};
pub use connection::backup::{BackupProgress, CheckpointMode};
pub use connection::function::{Aggregate, AggregateFunction, Function};
pub use connection::observation::{ChangeEvent, ChangeKind, ObserverHandle, TransactionObserver};
pub use connection::suspension::SuspensionHandle;
pub use connection::trace::{TraceEvent, TraceOptions};
pub use connection::transaction::{TransactionCompletion, TransactionKind};
pub use connection::{Connection, Rows};
pub use error::{Error, FkViolation, Result, SqliteError};
pub use region::DatabaseRegion;
pub use row::Row;
pub use schema::{
    ColumnInfo, FkViolations, ForeignKeyInfo, IndexInfo, IndexOrigin, PrimaryKeyInfo, SchemaId,
    SchemaInfo, SchemaObject, SchemaObjectKind, TableIdentifier,
};
pub use value::{FromValue, SqliteValue};
