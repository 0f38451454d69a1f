use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

use libsqlite3_sys::{
    sqlite3_aggregate_context, sqlite3_context, sqlite3_create_function_v2, sqlite3_result_blob,
    sqlite3_result_double, sqlite3_result_error, sqlite3_result_int64, sqlite3_result_null,
    sqlite3_result_text, sqlite3_user_data, sqlite3_value, sqlite3_value_blob,
    sqlite3_value_bytes, sqlite3_value_double, sqlite3_value_int64, sqlite3_value_text,
    sqlite3_value_type, SQLITE_BLOB, SQLITE_DETERMINISTIC, SQLITE_FLOAT, SQLITE_INTEGER,
    SQLITE_NULL, SQLITE_OK, SQLITE_TRANSIENT, SQLITE_UTF8,
};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::value::SqliteValue;

type ScalarFn = dyn Fn(&[SqliteValue]) -> Result<SqliteValue> + Send + Sync;

/// A user-defined scalar SQL function.
///
/// ```no_run
/// # use quarry::{Config, Connection, Function, SqliteValue};
/// # fn main() -> quarry::Result<()> {
/// # let mut conn = Connection::open_in_memory(Config::new())?;
/// conn.add_function(Function::new("double", Some(1), |args| {
///     match args[0] {
///         SqliteValue::Integer(i) => Ok(SqliteValue::Integer(i * 2)),
///         _ => Ok(SqliteValue::Null),
///     }
/// }))?;
/// # Ok(())
/// # }
/// ```
pub struct Function {
    name: String,
    argc: Option<u32>,
    pure: bool,
    call: Arc<ScalarFn>,
}

impl Function {
    /// `argc` is the fixed argument count; `None` makes the function
    /// variadic.
    pub fn new<F>(name: impl Into<String>, argc: Option<u32>, call: F) -> Self
    where
        F: Fn(&[SqliteValue]) -> Result<SqliteValue> + Send + Sync + 'static,
    {
        Function {
            name: name.into(),
            argc,
            pure: false,
            call: Arc::new(call),
        }
    }

    /// Marks the function deterministic: same inputs, same output. Lets the
    /// query planner factor calls out of loops.
    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }
}

/// State for one aggregate invocation.
pub trait Aggregate: Send + 'static {
    fn step(&mut self, args: &[SqliteValue]) -> Result<()>;
    fn finish(&mut self) -> Result<SqliteValue>;
}

type AggregateFactory = dyn Fn() -> Box<dyn Aggregate> + Send + Sync;

/// A user-defined aggregate SQL function. The factory runs lazily on the
/// first step of each invocation.
pub struct AggregateFunction {
    name: String,
    argc: Option<u32>,
    pure: bool,
    factory: Arc<AggregateFactory>,
}

impl AggregateFunction {
    pub fn new<F>(name: impl Into<String>, argc: Option<u32>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Aggregate> + Send + Sync + 'static,
    {
        AggregateFunction {
            name: name.into(),
            argc,
            pure: false,
            factory: Arc::new(factory),
        }
    }

    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }
}

struct ScalarDef {
    call: Arc<ScalarFn>,
}

struct AggregateDef {
    factory: Arc<AggregateFactory>,
}

/// Lives inside the engine's per-call aggregate-context buffer. Once a step
/// fails, the error sticks, later steps are skipped, and the finalizer
/// reports it.
struct AggregateInvocation {
    state: Box<dyn Aggregate>,
    error: Option<Error>,
}

impl Connection {
    /// Registers a scalar function under its `(name, argument-count)`
    /// identity, replacing any previous function with that identity.
    pub fn add_function(&mut self, function: Function) -> Result<()> {
        self.assert_owner();

        let name = function.name.clone();
        let argc = function.argc;
        let flags = function_flags(function.pure);
        let c_name = function_name(&name)?;
        let def = Box::into_raw(Box::new(ScalarDef {
            call: function.call,
        }));

        let status = unsafe {
            sqlite3_create_function_v2(
                self.handle.as_ptr(),
                c_name.as_ptr(),
                arity(argc)?,
                flags,
                def as *mut c_void,
                Some(scalar_trampoline),
                None,
                None,
                Some(free_boxed::<ScalarDef>),
            )
        };
        if status != SQLITE_OK {
            return Err(self.handle.last_error().into());
        }

        self.functions.insert((name, argc));
        Ok(())
    }

    /// Registers an aggregate function. Removal goes through
    /// [`remove_function`](Self::remove_function), which covers both kinds.
    pub fn add_aggregate(&mut self, function: AggregateFunction) -> Result<()> {
        self.assert_owner();

        let name = function.name.clone();
        let argc = function.argc;
        let flags = function_flags(function.pure);
        let c_name = function_name(&name)?;
        let def = Box::into_raw(Box::new(AggregateDef {
            factory: function.factory,
        }));

        let status = unsafe {
            sqlite3_create_function_v2(
                self.handle.as_ptr(),
                c_name.as_ptr(),
                arity(argc)?,
                flags,
                def as *mut c_void,
                None,
                Some(aggregate_step_trampoline),
                Some(aggregate_final_trampoline),
                Some(free_boxed::<AggregateDef>),
            )
        };
        if status != SQLITE_OK {
            return Err(self.handle.last_error().into());
        }

        self.functions.insert((name, argc));
        Ok(())
    }

    /// Removes the function registered under `(name, argc)` by re-registering
    /// a null implementation with the same identity. A no-op when nothing is
    /// registered under that identity.
    pub fn remove_function(&mut self, name: &str, argc: Option<u32>) -> Result<()> {
        self.assert_owner();

        if !self.functions.remove(&(name.to_owned(), argc)) {
            return Ok(());
        }

        let c_name = function_name(name)?;
        let status = unsafe {
            sqlite3_create_function_v2(
                self.handle.as_ptr(),
                c_name.as_ptr(),
                arity(argc)?,
                SQLITE_UTF8,
                std::ptr::null_mut(),
                None,
                None,
                None,
                None,
            )
        };
        if status != SQLITE_OK {
            return Err(self.handle.last_error().into());
        }
        Ok(())
    }
}

/// Default scalar functions, registered during setup.
pub(crate) fn default_functions() -> Vec<Function> {
    vec![
        Function::new("uppercase", Some(1), |args| {
            Ok(match &args[0] {
                SqliteValue::Text(s) => SqliteValue::Text(s.to_uppercase()),
                _ => SqliteValue::Null,
            })
        })
        .pure(),
        Function::new("lowercase", Some(1), |args| {
            Ok(match &args[0] {
                SqliteValue::Text(s) => SqliteValue::Text(s.to_lowercase()),
                _ => SqliteValue::Null,
            })
        })
        .pure(),
        Function::new("capitalize", Some(1), |args| {
            Ok(match &args[0] {
                SqliteValue::Text(s) => SqliteValue::Text(capitalize(s)),
                _ => SqliteValue::Null,
            })
        })
        .pure(),
    ]
}

/// Uppercases the first letter of every word, lowercases the rest.
fn capitalize(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut at_word_start = true;
    for c in input.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                output.extend(c.to_uppercase());
            } else {
                output.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            output.push(c);
            at_word_start = true;
        }
    }
    output
}

fn function_flags(pure: bool) -> c_int {
    let mut flags = SQLITE_UTF8;
    if pure {
        flags |= SQLITE_DETERMINISTIC;
    }
    flags
}

fn function_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|_| Error::InvalidConfiguration(format!("invalid function name: {name}")))
}

/// SQLite caps fixed-arity functions at 127 arguments; -1 means variadic.
fn arity(argc: Option<u32>) -> Result<c_int> {
    match argc {
        None => Ok(-1),
        Some(n) if n <= 127 => Ok(n as c_int),
        Some(n) => Err(Error::InvalidConfiguration(format!(
            "function argument count {n} exceeds the engine limit of 127"
        ))),
    }
}

unsafe extern "C" fn free_boxed<T>(p: *mut c_void) {
    drop(Box::from_raw(p as *mut T));
}

unsafe fn read_args(argc: c_int, argv: *mut *mut sqlite3_value) -> Vec<SqliteValue> {
    (0..argc as usize)
        .map(|i| {
            let raw = *argv.add(i);
            match sqlite3_value_type(raw) {
                SQLITE_NULL => SqliteValue::Null,
                SQLITE_INTEGER => SqliteValue::Integer(sqlite3_value_int64(raw)),
                SQLITE_FLOAT => SqliteValue::Real(sqlite3_value_double(raw)),
                SQLITE_BLOB => {
                    let ptr = sqlite3_value_blob(raw);
                    let len = sqlite3_value_bytes(raw) as usize;
                    if ptr.is_null() || len == 0 {
                        SqliteValue::Blob(Vec::new())
                    } else {
                        SqliteValue::Blob(slice::from_raw_parts(ptr as *const u8, len).to_vec())
                    }
                }
                _ => {
                    let ptr = sqlite3_value_text(raw);
                    if ptr.is_null() {
                        SqliteValue::Null
                    } else {
                        let len = sqlite3_value_bytes(raw) as usize;
                        let bytes = slice::from_raw_parts(ptr, len);
                        SqliteValue::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
            }
        })
        .collect()
}

unsafe fn set_result(ctx: *mut sqlite3_context, value: &SqliteValue) {
    match value {
        SqliteValue::Null => sqlite3_result_null(ctx),
        SqliteValue::Integer(i) => sqlite3_result_int64(ctx, *i),
        SqliteValue::Real(f) => sqlite3_result_double(ctx, *f),
        SqliteValue::Text(s) => sqlite3_result_text(
            ctx,
            s.as_ptr() as *const c_char,
            s.len() as c_int,
            SQLITE_TRANSIENT(),
        ),
        SqliteValue::Blob(b) => sqlite3_result_blob(
            ctx,
            b.as_ptr() as *const c_void,
            b.len() as c_int,
            SQLITE_TRANSIENT(),
        ),
    }
}

unsafe fn set_error(ctx: *mut sqlite3_context, error: &Error) {
    let message = error.to_string();
    sqlite3_result_error(
        ctx,
        message.as_ptr() as *const c_char,
        message.len() as c_int,
    );
}

unsafe extern "C" fn scalar_trampoline(
    ctx: *mut sqlite3_context,
    argc: c_int,
    argv: *mut *mut sqlite3_value,
) {
    let def = sqlite3_user_data(ctx) as *const ScalarDef;
    debug_assert!(!def.is_null());

    let args = read_args(argc, argv);
    let outcome = catch_unwind(AssertUnwindSafe(|| ((*def).call)(&args)));

    match outcome {
        Ok(Ok(value)) => set_result(ctx, &value),
        Ok(Err(error)) => set_error(ctx, &error),
        Err(_) => set_error(ctx, &Error::Protocol("function panicked".into())),
    }
}

unsafe extern "C" fn aggregate_step_trampoline(
    ctx: *mut sqlite3_context,
    argc: c_int,
    argv: *mut *mut sqlite3_value,
) {
    // the engine zero-initializes the buffer on first use; we keep a single
    // pointer to the lazily created invocation state in it
    let slot = sqlite3_aggregate_context(ctx, size_of_slot()) as *mut *mut AggregateInvocation;
    if slot.is_null() {
        // out of memory; the engine will fail the statement
        return;
    }

    if (*slot).is_null() {
        let def = sqlite3_user_data(ctx) as *const AggregateDef;
        debug_assert!(!def.is_null());

        let state = match catch_unwind(AssertUnwindSafe(|| ((*def).factory)())) {
            Ok(state) => state,
            Err(_) => {
                set_error(ctx, &Error::Protocol("aggregate factory panicked".into()));
                return;
            }
        };
        *slot = Box::into_raw(Box::new(AggregateInvocation { state, error: None }));
    }

    let invocation = &mut **slot;
    if invocation.error.is_some() {
        // an earlier step failed; skip the rest and let the finalizer report
        return;
    }

    let args = read_args(argc, argv);
    match catch_unwind(AssertUnwindSafe(|| invocation.state.step(&args))) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => invocation.error = Some(error),
        Err(_) => invocation.error = Some(Error::Protocol("aggregate step panicked".into())),
    }
}

unsafe extern "C" fn aggregate_final_trampoline(ctx: *mut sqlite3_context) {
    // zero-size request: returns the existing buffer, or NULL when no step
    // ever ran
    let slot = sqlite3_aggregate_context(ctx, 0) as *mut *mut AggregateInvocation;

    let mut invocation = if !slot.is_null() && !(*slot).is_null() {
        let boxed = Box::from_raw(*slot);
        *slot = std::ptr::null_mut();
        boxed
    } else {
        // an aggregate over zero rows still produces a value
        let def = sqlite3_user_data(ctx) as *const AggregateDef;
        debug_assert!(!def.is_null());
        match catch_unwind(AssertUnwindSafe(|| ((*def).factory)())) {
            Ok(state) => Box::new(AggregateInvocation { state, error: None }),
            Err(_) => {
                set_error(ctx, &Error::Protocol("aggregate factory panicked".into()));
                return;
            }
        }
    };

    if let Some(error) = invocation.error.take() {
        set_error(ctx, &error);
        return;
    }

    match catch_unwind(AssertUnwindSafe(|| invocation.state.finish())) {
        Ok(Ok(value)) => set_result(ctx, &value),
        Ok(Err(error)) => set_error(ctx, &error),
        Err(_) => set_error(ctx, &Error::Protocol("aggregate finalizer panicked".into())),
    }
}

fn size_of_slot() -> c_int {
    std::mem::size_of::<*mut AggregateInvocation>() as c_int
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_uppercases_word_starts() {
        assert_eq!(capitalize("hello world"), "Hello World");
        assert_eq!(capitalize("HELLO"), "Hello");
        assert_eq!(capitalize("foo-bar baz"), "Foo-Bar Baz");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn arity_rejects_oversized_fixed_counts() {
        assert_eq!(arity(None).unwrap(), -1);
        assert_eq!(arity(Some(2)).unwrap(), 2);
        assert!(arity(Some(128)).is_err());
    }
}
