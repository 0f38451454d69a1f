use std::ffi::{CStr, CString};
use std::ptr::{null_mut, NonNull};
use std::sync::{Arc, Mutex};

use libsqlite3_sys::{
    sqlite3, sqlite3_close, sqlite3_exec, sqlite3_get_autocommit, sqlite3_last_insert_rowid,
    sqlite3_next_stmt, sqlite3_sql, SQLITE_BUSY, SQLITE_MISUSE, SQLITE_OK,
};

use crate::error::{Error, Result, SqliteError};

// `libsqlite3-sys` deliberately omits this binding from its generated
// bindings (it blocklists it during bindgen), even though the bundled
// SQLite library exports the symbol. Declare it ourselves.
extern "C" {
    fn sqlite3_close_v2(db: *mut sqlite3) -> std::os::raw::c_int;
}

/// Managed handle to the raw SQLite3 database connection.
///
/// Closed explicitly through [`close`](Self::close), or with `close_v2` on
/// drop, which never fails visibly: any unprocessed error is routed to the
/// log because no user frame exists to receive it.
#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    ptr: NonNull<sqlite3>,
    closed: bool,

    /// It's unsafe to call `sqlite3_close` while another thread is performing
    /// `sqlite3_interrupt`, and vice versa, so both go through this mutex.
    /// It holds a copy of the pointer, cleared on close; the suspension gate
    /// shares the `Arc`.
    shared: Arc<Mutex<*mut sqlite3>>,
}

// SAFETY: a SQLite3 handle is safe to send between threads provided no more
// than one uses it at a time. The owning-thread watchdog on the connection
// enforces exactly that; cross-thread interrupt goes through `shared`.
// <https://www.sqlite.org/c3ref/threadsafe.html>
unsafe impl Send for ConnectionHandle {}

impl ConnectionHandle {
    /// # Safety
    ///
    /// `ptr` must be an open database handle owned by the caller.
    pub(crate) unsafe fn new(ptr: *mut sqlite3) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr),
            closed: false,
            shared: Arc::new(Mutex::new(ptr)),
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut sqlite3 {
        self.ptr.as_ptr()
    }

    pub(crate) fn shared_ptr(&self) -> Arc<Mutex<*mut sqlite3>> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn last_error(&self) -> SqliteError {
        SqliteError::new(self.as_ptr())
    }

    pub(crate) fn is_autocommit(&self) -> bool {
        unsafe { sqlite3_get_autocommit(self.as_ptr()) != 0 }
    }

    pub(crate) fn last_insert_rowid(&self) -> i64 {
        unsafe { sqlite3_last_insert_rowid(self.as_ptr()) }
    }

    /// Runs `sql` through `sqlite3_exec`, bypassing the statement caches.
    /// The suspension gate uses this for its compensating ROLLBACK so the
    /// cache cannot recurse into the gate.
    pub(crate) fn exec(&self, sql: &str) -> Result<(), SqliteError> {
        let sql = CString::new(sql).map_err(|_| SqliteError::from_code(SQLITE_MISUSE))?;
        let status =
            unsafe { sqlite3_exec(self.as_ptr(), sql.as_ptr(), None, null_mut(), null_mut()) };
        if status == SQLITE_OK {
            Ok(())
        } else {
            Err(self.last_error())
        }
    }

    /// Explicit close. Fails with `SQLITE_BUSY` when statements are still in
    /// flight; each leaked statement's SQL is logged so the leak is
    /// diagnosable.
    pub(crate) fn close(&mut self) -> Result<()> {
        // https://sqlite.org/c3ref/close.html
        let status = unsafe { sqlite3_close(self.as_ptr()) };
        if status == SQLITE_OK {
            *self.shared.lock().unwrap() = null_mut();
            self.closed = true;
            return Ok(());
        }

        if status == SQLITE_BUSY {
            unsafe {
                let mut statement = sqlite3_next_stmt(self.as_ptr(), null_mut());
                while !statement.is_null() {
                    let sql = sqlite3_sql(statement);
                    if !sql.is_null() {
                        log::error!(
                            target: "quarry::connection",
                            "statement not finalized at close: `{}`",
                            CStr::from_ptr(sql).to_string_lossy(),
                        );
                    }
                    statement = sqlite3_next_stmt(self.as_ptr(), statement);
                }
            }
        }

        Err(Error::Sqlite(self.last_error()))
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        // suspend() must not race the close below
        *self.shared.lock().unwrap() = null_mut();

        // https://sqlite.org/c3ref/close.html
        // close_v2 turns the handle into a zombie finalized with its last
        // statement, so it cannot fail the way sqlite3_close can
        let status = unsafe { sqlite3_close_v2(self.ptr.as_ptr()) };
        if status != SQLITE_OK {
            log::error!(
                target: "quarry::connection",
                "error closing database: {}",
                SqliteError::from_code(status),
            );
        }
    }
}
