use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::null_mut;
use std::time::Duration;

use libsqlite3_sys::{
    sqlite3_sql, sqlite3_stmt, sqlite3_trace_v2, SQLITE_TRACE_PROFILE, SQLITE_TRACE_STMT,
};

use crate::connection::Connection;

bitflags::bitflags! {
    /// Which trace events the connection emits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraceOptions: c_uint {
        /// An event each time a statement starts running.
        const STATEMENT = SQLITE_TRACE_STMT as c_uint;
        /// An event with the elapsed time each time a statement finishes.
        const PROFILE = SQLITE_TRACE_PROFILE as c_uint;
    }
}

/// A statement lifecycle event delivered to the trace sink.
#[derive(Debug)]
pub enum TraceEvent<'a> {
    /// A statement began running. For statements run from inside triggers
    /// the text is the engine's unexpanded comment form.
    Statement { sql: &'a str },
    /// A statement finished, with the engine's estimate of elapsed time.
    Profile { sql: &'a str, duration: Duration },
}

type TraceFn = dyn Fn(&TraceEvent<'_>) + Send;

/// Heap-pinned sink passed to the engine as trace user data.
pub(crate) struct TraceContext {
    sink: Box<TraceFn>,
}

impl Connection {
    /// Installs `sink` for the given trace events, replacing any previous
    /// sink. Empty `options` uninstall tracing entirely.
    pub fn trace<F>(&mut self, options: TraceOptions, sink: F)
    where
        F: Fn(&TraceEvent<'_>) + Send + 'static,
    {
        self.assert_owner();

        if options.is_empty() {
            unsafe {
                sqlite3_trace_v2(self.handle.as_ptr(), 0, None, null_mut());
            }
            self.trace = None;
            return;
        }

        let context = Box::new(TraceContext {
            sink: Box::new(sink),
        });
        unsafe {
            sqlite3_trace_v2(
                self.handle.as_ptr(),
                options.bits(),
                Some(trace_trampoline),
                &*context as *const TraceContext as *mut c_void,
            );
        }
        // retain the sink for as long as the engine may call it
        self.trace = Some(context);
    }

    /// The default sink installed when `Config::trace_options` is non-empty:
    /// events are forwarded to `tracing` at TRACE level.
    pub(crate) fn install_default_trace(&mut self, options: TraceOptions) {
        self.trace(options, |event| match event {
            TraceEvent::Statement { sql } => {
                tracing::trace!(target: "quarry::trace", %sql, "statement");
            }
            TraceEvent::Profile { sql, duration } => {
                tracing::trace!(target: "quarry::trace", %sql, ?duration, "profile");
            }
        });
    }
}

unsafe extern "C" fn trace_trampoline(
    event: c_uint,
    user_data: *mut c_void,
    p: *mut c_void,
    x: *mut c_void,
) -> c_int {
    if user_data.is_null() {
        return 0;
    }
    let context = &*(user_data as *const TraceContext);

    let _ = catch_unwind(AssertUnwindSafe(|| match event {
        e if e == SQLITE_TRACE_STMT as c_uint => {
            if x.is_null() {
                return;
            }
            let sql = CStr::from_ptr(x as *const c_char).to_string_lossy();
            (context.sink)(&TraceEvent::Statement { sql: &sql });
        }
        e if e == SQLITE_TRACE_PROFILE as c_uint => {
            let statement = p as *mut sqlite3_stmt;
            let sql_ptr = sqlite3_sql(statement);
            if sql_ptr.is_null() || x.is_null() {
                return;
            }
            let sql = CStr::from_ptr(sql_ptr).to_string_lossy();
            let nanos = *(x as *const i64);
            (context.sink)(&TraceEvent::Profile {
                sql: &sql,
                duration: Duration::from_nanos(u64::try_from(nanos).unwrap_or_default()),
            });
        }
        _ => {}
    }));

    0
}
