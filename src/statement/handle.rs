use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr::NonNull;
use std::slice;

use libsqlite3_sys::{
    sqlite3, sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int64, sqlite3_bind_null,
    sqlite3_bind_parameter_count, sqlite3_bind_text, sqlite3_changes, sqlite3_clear_bindings,
    sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_count, sqlite3_column_double,
    sqlite3_column_int64, sqlite3_column_name, sqlite3_column_text, sqlite3_column_type,
    sqlite3_db_handle, sqlite3_finalize, sqlite3_reset, sqlite3_sql, sqlite3_step,
    sqlite3_stmt, sqlite3_stmt_readonly, SQLITE_BLOB, SQLITE_DONE, SQLITE_FLOAT, SQLITE_INTEGER,
    SQLITE_NULL, SQLITE_ROW, SQLITE_TRANSIENT,
};

use crate::error::{decode_result, SqliteError};
use crate::value::SqliteValue;

/// Owns a single compiled `sqlite3_stmt`, finalized on drop.
#[derive(Debug)]
pub(crate) struct StatementHandle(NonNull<sqlite3_stmt>);

// SAFETY: a statement handle may be sent between threads as long as it is
// only *used* from one thread at a time; the owning-thread watchdog on the
// connection upholds this for every call below.
unsafe impl Send for StatementHandle {}

impl StatementHandle {
    pub(crate) fn new(ptr: NonNull<sqlite3_stmt>) -> Self {
        Self(ptr)
    }

    fn as_ptr(&self) -> *mut sqlite3_stmt {
        self.0.as_ptr()
    }

    pub(crate) fn db_handle(&self) -> *mut sqlite3 {
        // SAFETY: the database handle outlives every statement compiled on it;
        // the connection finalizes its statement caches before closing.
        unsafe { sqlite3_db_handle(self.as_ptr()) }
    }

    /// Runs the statement one step. `Ok(true)` means a row is available.
    pub(crate) fn step(&mut self) -> Result<bool, SqliteError> {
        // https://www.sqlite.org/c3ref/step.html
        match unsafe { sqlite3_step(self.as_ptr()) } {
            SQLITE_ROW => Ok(true),
            SQLITE_DONE => Ok(false),
            _ => Err(SqliteError::new(self.db_handle())),
        }
    }

    pub(crate) fn reset(&mut self) {
        // a non-OK return repeats the error of the most recent step; it has
        // already been reported there
        unsafe {
            sqlite3_reset(self.as_ptr());
        }
    }

    pub(crate) fn clear_bindings(&mut self) {
        unsafe {
            sqlite3_clear_bindings(self.as_ptr());
        }
    }

    pub(crate) fn bind_parameter_count(&self) -> usize {
        unsafe { sqlite3_bind_parameter_count(self.as_ptr()) as usize }
    }

    /// Binds `value` at the 1-based parameter `index`.
    pub(crate) fn bind_value(
        &mut self,
        index: usize,
        value: &SqliteValue,
    ) -> Result<(), SqliteError> {
        let index = index as c_int;
        let status = unsafe {
            match value {
                SqliteValue::Null => sqlite3_bind_null(self.as_ptr(), index),
                SqliteValue::Integer(i) => sqlite3_bind_int64(self.as_ptr(), index, *i),
                SqliteValue::Real(f) => sqlite3_bind_double(self.as_ptr(), index, *f),
                SqliteValue::Text(s) => sqlite3_bind_text(
                    self.as_ptr(),
                    index,
                    s.as_ptr() as *const c_char,
                    s.len() as c_int,
                    SQLITE_TRANSIENT(),
                ),
                SqliteValue::Blob(b) => sqlite3_bind_blob(
                    self.as_ptr(),
                    index,
                    b.as_ptr() as *const c_void,
                    b.len() as c_int,
                    SQLITE_TRANSIENT(),
                ),
            }
        };

        decode_result(self.db_handle(), status)
    }

    pub(crate) fn column_count(&self) -> usize {
        unsafe { sqlite3_column_count(self.as_ptr()) as usize }
    }

    pub(crate) fn column_name(&self, index: usize) -> String {
        unsafe {
            let name = sqlite3_column_name(self.as_ptr(), index as c_int);
            debug_assert!(!name.is_null());
            CStr::from_ptr(name).to_string_lossy().into_owned()
        }
    }

    /// Copies the value of column `index` of the current row out of the
    /// engine's row buffer.
    pub(crate) fn column_value(&self, index: usize) -> SqliteValue {
        let index = index as c_int;
        unsafe {
            match sqlite3_column_type(self.as_ptr(), index) {
                SQLITE_NULL => SqliteValue::Null,
                SQLITE_INTEGER => SqliteValue::Integer(sqlite3_column_int64(self.as_ptr(), index)),
                SQLITE_FLOAT => SqliteValue::Real(sqlite3_column_double(self.as_ptr(), index)),
                SQLITE_BLOB => {
                    let ptr = sqlite3_column_blob(self.as_ptr(), index);
                    let len = sqlite3_column_bytes(self.as_ptr(), index) as usize;
                    if ptr.is_null() || len == 0 {
                        SqliteValue::Blob(Vec::new())
                    } else {
                        SqliteValue::Blob(slice::from_raw_parts(ptr as *const u8, len).to_vec())
                    }
                }
                // TEXT, or an unknown type which the text accessor coerces
                _ => {
                    let ptr = sqlite3_column_text(self.as_ptr(), index);
                    if ptr.is_null() {
                        SqliteValue::Null
                    } else {
                        let len = sqlite3_column_bytes(self.as_ptr(), index) as usize;
                        let bytes = slice::from_raw_parts(ptr, len);
                        SqliteValue::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
            }
        }
    }

    /// Rows written by the most recent `step` run to completion, read off the
    /// owning database handle.
    pub(crate) fn changes(&self) -> u64 {
        unsafe { sqlite3_changes(self.db_handle()) as u64 }
    }

    /// Whether the engine classified this statement as read-only.
    pub(crate) fn read_only(&self) -> bool {
        unsafe { sqlite3_stmt_readonly(self.as_ptr()) != 0 }
    }

    /// The original SQL text of this statement.
    pub(crate) fn sql(&self) -> String {
        unsafe {
            let sql = sqlite3_sql(self.as_ptr());
            if sql.is_null() {
                String::new()
            } else {
                CStr::from_ptr(sql).to_string_lossy().into_owned()
            }
        }
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        // https://sqlite.org/c3ref/finalize.html
        unsafe {
            let _ = sqlite3_finalize(self.as_ptr());
        }
    }
}
