use std::ffi::CStr;
use std::fmt::{self, Display, Formatter};
use std::os::raw::c_int;

use libsqlite3_sys::{sqlite3, sqlite3_errmsg, sqlite3_errstr, sqlite3_extended_errcode, SQLITE_OK};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All the ways a database operation can fail.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A non-OK result code returned by the engine.
    #[error(transparent)]
    Sqlite(#[from] SqliteError),

    /// An explicitly named schema does not exist.
    #[error("no such schema: {0}")]
    NoSuchSchema(String),

    /// Introspection was asked about a table that exists in no resolved schema.
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// `primary_key` was called on a view.
    #[error("no primary key for view: {0}")]
    NoPrimaryKeyForView(String),

    /// The engine rolled the transaction back underneath a transaction block;
    /// statements issued after that point fail with this error.
    #[error("transaction was aborted")]
    TransactionAborted,

    /// The connection is suspended and the statement would acquire a lock.
    #[error("database is suspended")]
    Suspended,

    /// The first violation found by `check_foreign_keys`.
    #[error("{0}")]
    ForeignKeyViolation(FkViolation),

    /// Bad arguments supplied by the caller.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A value could not be decoded as the requested Rust type.
    #[error("decode error: {0}")]
    Decode(String),

    /// An internal contract was breached (oversized SQL, embedded NUL, ...).
    #[error("{0}")]
    Protocol(String),
}

/// An error returned by the SQLite engine.
///
/// Carries the extended result code, the primary code derived from it, the
/// engine's message, and the SQL that was executing when available.
#[derive(Debug)]
pub struct SqliteError {
    code: c_int,
    extended_code: c_int,
    message: String,
    sql: Option<String>,
}

impl SqliteError {
    /// Reads the current error state off an open database handle.
    pub(crate) fn new(handle: *mut sqlite3) -> Self {
        // https://www.sqlite.org/c3ref/errcode.html
        let extended_code = unsafe { sqlite3_extended_errcode(handle) };
        let message = unsafe {
            let msg = sqlite3_errmsg(handle);
            debug_assert!(!msg.is_null());
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        };

        Self {
            code: extended_code & 0xff,
            extended_code,
            message,
            sql: None,
        }
    }

    /// Builds an error from a bare result code, without a handle to consult.
    pub(crate) fn from_code(code: c_int) -> Self {
        let message = unsafe {
            let msg = sqlite3_errstr(code);
            debug_assert!(!msg.is_null());
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        };

        Self {
            code: code & 0xff,
            extended_code: code,
            message,
            sql: None,
        }
    }

    pub(crate) fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_owned());
        self
    }

    /// The primary result code (lower eight bits of the extended code).
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The extended result code.
    pub fn extended_code(&self) -> i32 {
        self.extended_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The SQL that was executing when the error was captured, if any.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }
}

impl Display for SqliteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(code: {}) {}", self.extended_code, self.message)?;
        if let Some(sql) = &self.sql {
            write!(f, " - while executing `{sql}`")?;
        }
        Ok(())
    }
}

impl std::error::Error for SqliteError {}

/// A single row reported by `PRAGMA foreign_key_check`, enriched with the
/// column mapping of the violated constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkViolation {
    pub origin_table: String,
    /// `None` for `WITHOUT ROWID` origin tables.
    pub origin_rowid: Option<i64>,
    pub origin_columns: Vec<String>,
    pub destination_table: String,
    pub destination_columns: Vec<String>,
    pub fk_id: i64,
}

impl Display for FkViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FOREIGN KEY constraint violation - from {}({}) to {}({})",
            self.origin_table,
            self.origin_columns.join(", "),
            self.destination_table,
            self.destination_columns.join(", "),
        )?;
        if let Some(rowid) = self.origin_rowid {
            write!(f, ", in rowid {rowid}")?;
        }
        Ok(())
    }
}

/// Maps a result code to `Ok(())` or the current error state of `db`.
pub(crate) fn decode_result(db: *mut sqlite3, code: c_int) -> Result<(), SqliteError> {
    if code == SQLITE_OK {
        Ok(())
    } else {
        Err(SqliteError::new(db))
    }
}
