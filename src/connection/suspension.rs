use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr::{null_mut, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use libsqlite3_sys::{sqlite3, sqlite3_interrupt, sqlite3_prepare_v2, sqlite3_stmt, SQLITE_OK};

use crate::connection::handle::ConnectionHandle;
use crate::error::{Error, Result, SqliteError};
use crate::statement;
use crate::statement::handle::StatementHandle;
use crate::value::FromValue;

/// The only cross-thread state of a connection.
///
/// `suspend()` and `resume()` are intentionally callable from any thread:
/// the host platform requests "no locks held" during resource-pressure
/// events and cannot wait for the owning executor's turn.
pub(crate) struct SuspensionState {
    suspended: AtomicBool,

    /// Copy of the database pointer shared with [`ConnectionHandle`];
    /// cleared on close so `sqlite3_interrupt` never races `sqlite3_close`.
    db: Arc<Mutex<*mut sqlite3>>,

    /// Journal mode is assumed to not change after setup, so the first
    /// fetch is cached for the lifetime of the connection and never cleared.
    journal_mode: Mutex<Option<String>>,
}

// SAFETY: `db` is a raw pointer only ever dereferenced under the mutex, and
// `sqlite3_interrupt` is documented as callable from any thread against an
// open handle.
unsafe impl Send for SuspensionState {}
unsafe impl Sync for SuspensionState {}

impl SuspensionState {
    pub(crate) fn new(db: Arc<Mutex<*mut sqlite3>>) -> Self {
        Self {
            suspended: AtomicBool::new(false),
            db,
            journal_mode: Mutex::new(None),
        }
    }

    /// Sets the suspended flag, then interrupts the engine so any in-flight
    /// statement aborts, usually releasing its locks. Idempotent.
    pub(crate) fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);

        let db = self.db.lock().unwrap();
        if !db.is_null() {
            unsafe {
                sqlite3_interrupt(*db);
            }
        }
    }

    /// Clears the suspended flag. Unconditionally idempotent.
    pub(crate) fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

/// Suspends and resumes a connection from any thread.
///
/// Cloneable and detached from the connection's lifetime: suspending after
/// the connection closed is a no-op.
#[derive(Clone)]
pub struct SuspensionHandle(pub(crate) Arc<SuspensionState>);

impl SuspensionHandle {
    pub fn suspend(&self) {
        self.0.suspend();
    }

    pub fn resume(&self) {
        self.0.resume();
    }
}

/// Rejects `statement` when the connection is suspended and running it could
/// acquire a file lock.
///
/// Allowed while suspended: statements that only ever release locks
/// (COMMIT/ROLLBACK/RELEASE), and read-only statements when the journal mode
/// is WAL (readers never block the checkpointer there). Everything else gets
/// a best-effort ROLLBACK through the direct exec path, then fails.
pub(crate) fn check_suspension_violation(
    handle: &ConnectionHandle,
    state: &SuspensionState,
    stmt: &StatementHandle,
) -> Result<()> {
    if !state.is_suspended() {
        return Ok(());
    }

    if statement::releases_database_lock(&stmt.sql()) {
        return Ok(());
    }

    if stmt.read_only() {
        let journal = journal_mode(handle, state)?;
        if journal.eq_ignore_ascii_case("wal") {
            return Ok(());
        }
    }

    let _ = handle.exec("ROLLBACK");
    Err(Error::Suspended)
}

/// The connection's journal mode, fetched once through a direct prepared
/// statement. Never routed through the statement caches: the gate calls this
/// while rejecting statements and must not recurse.
pub(crate) fn journal_mode(handle: &ConnectionHandle, state: &SuspensionState) -> Result<String> {
    let mut cached = state.journal_mode.lock().unwrap();
    if let Some(mode) = cached.as_ref() {
        return Ok(mode.clone());
    }

    const SQL: &CStr = c"PRAGMA journal_mode";

    let mut raw: *mut sqlite3_stmt = null_mut();
    let status = unsafe {
        sqlite3_prepare_v2(
            handle.as_ptr(),
            SQL.as_ptr() as *const c_char,
            -1,
            &mut raw,
            null_mut(),
        )
    };
    if status != SQLITE_OK {
        return Err(SqliteError::new(handle.as_ptr()).into());
    }

    let Some(raw) = NonNull::new(raw) else {
        return Err(Error::Protocol("PRAGMA journal_mode compiled to nothing".into()));
    };

    // finalized on drop
    let mut statement = StatementHandle::new(raw);
    let mode = if statement.step()? {
        String::from_value(&statement.column_value(0))?
    } else {
        return Err(Error::Protocol("PRAGMA journal_mode returned no row".into()));
    };

    *cached = Some(mode.clone());
    Ok(mode)
}
