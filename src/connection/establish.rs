use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::ptr::{null, null_mut};
use std::sync::Arc;

use libsqlite3_sys::{
    sqlite3_busy_handler, sqlite3_busy_timeout, sqlite3_db_config, sqlite3_extended_result_codes,
    sqlite3_open_v2, SQLITE_DBCONFIG_DQS_DDL, SQLITE_DBCONFIG_DQS_DML, SQLITE_OK,
    SQLITE_OPEN_CREATE, SQLITE_OPEN_MEMORY, SQLITE_OPEN_NOMUTEX, SQLITE_OPEN_PRIVATECACHE,
    SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE,
};

use crate::config::{BusyMode, Config};
use crate::connection::authorizer::install_authorizer;
use crate::connection::collation::unicode_ci;
use crate::connection::function::default_functions;
use crate::connection::handle::ConnectionHandle;
use crate::connection::observation::install_hooks;
use crate::connection::Connection;
use crate::error::{Error, Result, SqliteError};

pub(crate) struct EstablishParams {
    filename: CString,
    open_flags: i32,
}

impl EstablishParams {
    pub(crate) fn from_path(path: &Path, config: &Config, in_memory: bool) -> Result<Self> {
        let filename = path.to_str().ok_or_else(|| {
            Error::InvalidConfiguration("database path must be valid UTF-8".into())
        })?;
        let filename = CString::new(filename).map_err(|_| {
            Error::InvalidConfiguration("database path must not contain nul bytes".into())
        })?;

        // The serializing executor is the caller's concern and the watchdog
        // asserts single-threaded use, so the engine's own mutex is waived.
        let mut flags = SQLITE_OPEN_NOMUTEX | SQLITE_OPEN_PRIVATECACHE;

        flags |= if config.read_only {
            SQLITE_OPEN_READONLY
        } else if config.create_if_missing {
            SQLITE_OPEN_CREATE | SQLITE_OPEN_READWRITE
        } else {
            SQLITE_OPEN_READWRITE
        };

        if in_memory {
            flags |= SQLITE_OPEN_MEMORY;
        }

        Ok(Self {
            filename,
            open_flags: flags,
        })
    }

    pub(crate) fn establish(&self) -> Result<ConnectionHandle> {
        let mut handle = null_mut();

        // <https://www.sqlite.org/c3ref/open.html>
        let status =
            unsafe { sqlite3_open_v2(self.filename.as_ptr(), &mut handle, self.open_flags, null()) };

        if handle.is_null() {
            // the engine could not even allocate the sqlite3 object
            return Err(SqliteError::from_code(status).into());
        }

        // from here on RAII closes the handle on any early return
        let handle = unsafe { ConnectionHandle::new(handle) };

        if status != SQLITE_OK {
            return Err(handle.last_error().into());
        }

        Ok(handle)
    }
}

/// Retains the user busy callback for as long as the engine may call it.
pub(crate) struct BusyHandlerCtx {
    callback: Arc<dyn Fn(u32) -> bool + Send + Sync>,
}

unsafe extern "C" fn busy_trampoline(user_data: *mut c_void, count: c_int) -> c_int {
    if user_data.is_null() {
        return 0;
    }
    let ctx = &*(user_data as *const BusyHandlerCtx);
    let retry = catch_unwind(AssertUnwindSafe(|| (ctx.callback)(count.max(0) as u32)));
    c_int::from(retry.unwrap_or(false))
}

/// Runs the setup sequence once, immediately after open. Every other entry
/// point assumes it completed.
pub(crate) fn setup(conn: &mut Connection) -> Result<()> {
    let db = conn.handle.as_ptr();

    // 1. busy policy
    match conn.config.busy_mode.clone() {
        BusyMode::ImmediateError => {}
        BusyMode::Timeout(timeout) => {
            let ms = i32::try_from(timeout.0.as_millis()).map_err(|_| {
                Error::InvalidConfiguration("busy timeout does not fit in milliseconds".into())
            })?;
            let status = unsafe { sqlite3_busy_timeout(db, ms) };
            if status != SQLITE_OK {
                return Err(conn.handle.last_error().into());
            }
        }
        BusyMode::Callback(callback) => {
            let ctx = Box::new(BusyHandlerCtx { callback });
            let status = unsafe {
                sqlite3_busy_handler(
                    db,
                    Some(busy_trampoline),
                    &*ctx as *const BusyHandlerCtx as *mut c_void,
                )
            };
            if status != SQLITE_OK {
                return Err(conn.handle.last_error().into());
            }
            conn.busy_handler = Some(ctx);
        }
    }

    // 2. double-quoted string literals; ignore the result: engines predating
    // the option accept the legacy quirk unconditionally
    let dqs = c_int::from(conn.config.accepts_double_quoted_string_literals);
    unsafe {
        sqlite3_db_config(db, SQLITE_DBCONFIG_DQS_DDL, dqs, null_mut::<c_int>());
        sqlite3_db_config(db, SQLITE_DBCONFIG_DQS_DML, dqs, null_mut::<c_int>());
    }

    // 3. foreign keys
    if conn.config.foreign_keys {
        conn.execute_internal("PRAGMA foreign_keys = ON")?;
    }

    // 4. default functions and collations
    for function in default_functions() {
        conn.add_function(function)?;
    }
    conn.add_collation("UNICODE_CI", unicode_ci)?;

    // 5. the permanent authorizer; delegates swap through scoped acquisition
    install_authorizer(db, &*conn.hooks);

    // 6. transaction observation hooks
    install_hooks(db, &*conn.hooks);

    // 7. extended result codes
    // https://www.sqlite.org/c3ref/extended_result_codes.html
    unsafe {
        sqlite3_extended_result_codes(db, 1);
    }

    // 7b. tracing, when configured
    let trace_options = conn.config.trace_options;
    if !trace_options.is_empty() {
        conn.install_default_trace(trace_options);
    }

    // 8. user setup hook
    if let Some(prepare) = conn.config.prepare_database.clone() {
        prepare(conn)?;
    }

    // 9. validate the file format; a non-database payload fails here with
    // SQLITE_NOTADB rather than on the first user statement
    conn.query_all_internal("SELECT * FROM sqlite_master LIMIT 1")?;

    Ok(())
}
