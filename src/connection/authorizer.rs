use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use libsqlite3_sys::{
    sqlite3, sqlite3_set_authorizer, SQLITE_DENY, SQLITE_IGNORE, SQLITE_OK, SQLITE_READ,
};

use crate::connection::observation::HookContext;
use crate::connection::Connection;
use crate::error::Result;
use crate::region::DatabaseRegion;

/// The verdict an authorizer returns for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Let the action through.
    Allow,
    /// Fail the statement's compilation with an authorization error.
    Deny,
    /// Compile the statement, but make the action a no-op (reads yield NULL).
    Ignore,
}

impl Authorization {
    fn into_raw(self) -> c_int {
        match self {
            Authorization::Allow => SQLITE_OK,
            Authorization::Deny => SQLITE_DENY,
            Authorization::Ignore => SQLITE_IGNORE,
        }
    }
}

/// One action the engine asks the authorizer about during statement
/// compilation. The meaning of `arg1`/`arg2` depends on `code`; for
/// `SQLITE_READ`, `arg1` is the table and `arg2` the column.
#[derive(Debug)]
pub struct AuthAction<'a> {
    /// The raw `SQLITE_*` action code.
    pub code: i32,
    pub arg1: Option<&'a str>,
    pub arg2: Option<&'a str>,
    /// The schema concerned, when applicable.
    pub database: Option<&'a str>,
    /// The inner-most trigger or view responsible for the access, if any.
    pub accessor: Option<&'a str>,
}

/// A delegate consulted while statements compile.
///
/// Exactly one engine-level authorizer is installed per connection, at
/// setup; delegates are swapped in and out through
/// [`Connection::with_authorizer`]. Installing a fresh engine callback per
/// delegate would invalidate prepared statements.
pub trait StatementAuthorizer: Send {
    fn authorize(&mut self, action: &AuthAction<'_>) -> Authorization;
}

impl<F> StatementAuthorizer for F
where
    F: FnMut(&AuthAction<'_>) -> Authorization + Send,
{
    fn authorize(&mut self, action: &AuthAction<'_>) -> Authorization {
        self(action)
    }
}

impl Connection {
    /// Runs `f` with `authorizer` installed as the connection's delegate,
    /// restoring the previous delegate on every exit path.
    pub fn with_authorizer<A, F, R>(&mut self, authorizer: A, f: F) -> Result<R>
    where
        A: StatementAuthorizer + 'static,
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        self.assert_owner();

        let previous = self.hooks.swap_authorizer(Some(Box::new(authorizer)));
        let result = f(self);
        self.hooks.swap_authorizer(previous);
        result
    }

    /// Runs `f` while recording which tables its statements read, and unions
    /// the recorded region into `region`. Recording into a region that
    /// already covers the full database is skipped.
    pub fn recording_selection<F, R>(&mut self, region: &mut DatabaseRegion, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        self.assert_owner();

        if region.is_full() {
            return f(self);
        }

        let previous = self.hooks.swap_selection(Some(DatabaseRegion::default()));
        let result = f(self);
        if let Some(recorded) = self.hooks.swap_selection(previous) {
            region.union(&recorded);
        }
        result
    }
}

/// Installs the permanent authorizer. `context` must stay pinned for the
/// lifetime of the database handle.
pub(crate) fn install_authorizer(db: *mut sqlite3, context: *const HookContext) {
    unsafe {
        sqlite3_set_authorizer(db, Some(authorizer_trampoline), context as *mut c_void);
    }
}

unsafe fn optional_str<'a>(ptr: *const c_char) -> Option<std::borrow::Cow<'a, str>> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy())
    }
}

unsafe extern "C" fn authorizer_trampoline(
    user_data: *mut c_void,
    code: c_int,
    arg1: *const c_char,
    arg2: *const c_char,
    database: *const c_char,
    accessor: *const c_char,
) -> c_int {
    if user_data.is_null() {
        return SQLITE_OK;
    }
    let context = &*(user_data as *const HookContext);

    let arg1 = optional_str(arg1);
    let arg2 = optional_str(arg2);
    let database = optional_str(database);
    let accessor = optional_str(accessor);

    // region recording sees every action, whatever the delegate decides
    if code == SQLITE_READ {
        if let Some(region) = context.compile_region.borrow_mut().as_mut() {
            if let Some(table) = arg1.as_deref() {
                region.insert_table(table);
            }
        }
    }

    let mut delegate = context.authorizer.borrow_mut();
    let Some(delegate) = delegate.as_mut() else {
        return SQLITE_OK;
    };

    let action = AuthAction {
        code,
        arg1: arg1.as_deref(),
        arg2: arg2.as_deref(),
        database: database.as_deref(),
        accessor: accessor.as_deref(),
    };

    catch_unwind(AssertUnwindSafe(|| delegate.authorize(&action)))
        .map_or(SQLITE_DENY, Authorization::into_raw)
}
