use std::cell::{Cell, RefCell};
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use libsqlite3_sys::{
    sqlite3, sqlite3_commit_hook, sqlite3_rollback_hook, sqlite3_update_hook, SQLITE_DELETE,
    SQLITE_INSERT, SQLITE_UPDATE,
};

use crate::connection::authorizer::StatementAuthorizer;
use crate::error::{Error, Result};
use crate::region::DatabaseRegion;

/// A change reported by the engine's update hook, before the transaction
/// commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change inside the current transaction.
#[derive(Debug)]
pub struct ChangeEvent<'a> {
    pub kind: ChangeKind,
    /// The schema the change happened in (`main`, `temp`, or an attachment).
    pub database: &'a str,
    pub table: &'a str,
    pub rowid: i64,
}

/// Observes the lifecycle of transactions on one connection.
///
/// Callbacks run synchronously inside statement execution, on the
/// connection's owning thread. They must not call back into the connection.
pub trait TransactionObserver: Send {
    /// Filter for [`on_change`](Self::on_change); defaults to observing
    /// every table.
    fn observes_table(&self, _table: &str) -> bool {
        true
    }

    /// A row changed inside the current transaction.
    fn on_change(&mut self, event: &ChangeEvent<'_>);

    /// The transaction is about to commit. Returning an error vetoes the
    /// commit: the engine rolls back and the error surfaces to whoever ran
    /// the committing statement.
    fn will_commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn did_commit(&mut self);

    fn did_rollback(&mut self);
}

/// Identifies a registered observer so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(u64);

/// What the engine hooks reported for the statement that just ran.
#[derive(Default)]
pub(crate) enum StatementCompletion {
    #[default]
    Idle,
    Commit,
    Rollback,
    /// An observer vetoed the commit; the engine rolled back and this error
    /// must replace the engine's own commit-hook constraint error.
    ErrorRollback(Error),
}

/// Heap-pinned state shared with the engine's C callbacks.
///
/// A raw pointer to this struct is installed as user data for the commit,
/// rollback, and update hooks and for the authorizer, all at setup, exactly
/// once: swapping callbacks between statements invalidates prepared
/// statements and produces spurious `SQLITE_ABORT` rollbacks. The non-atomic
/// interior is only ever touched from the owning thread (watchdog-enforced),
/// which is what makes the aliasing sound.
pub(crate) struct HookContext {
    completion: RefCell<StatementCompletion>,
    observers: RefCell<Vec<(u64, Box<dyn TransactionObserver>)>>,
    next_observer_id: Cell<u64>,
    pub(crate) authorizer: RefCell<Option<Box<dyn StatementAuthorizer>>>,
    /// Region being recorded for the statement currently compiling.
    pub(crate) compile_region: RefCell<Option<DatabaseRegion>>,
    /// Accumulator for an active `recording_selection` scope.
    pub(crate) selection: RefCell<Option<DatabaseRegion>>,
}

impl HookContext {
    pub(crate) fn new() -> Self {
        Self {
            completion: RefCell::new(StatementCompletion::Idle),
            observers: RefCell::new(Vec::new()),
            next_observer_id: Cell::new(0),
            authorizer: RefCell::new(None),
            compile_region: RefCell::new(None),
            selection: RefCell::new(None),
        }
    }

    pub(crate) fn add_observer(&self, observer: Box<dyn TransactionObserver>) -> ObserverHandle {
        let id = self.next_observer_id.get();
        self.next_observer_id.set(id + 1);
        self.observers.borrow_mut().push((id, observer));
        ObserverHandle(id)
    }

    pub(crate) fn remove_observer(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(id, _)| *id != handle.0);
        observers.len() != before
    }

    /// Consumes the completion recorded by the hooks for the statement that
    /// just ran, notifying observers. An observer veto rethrows here, after
    /// the rollback notification.
    pub(crate) fn dispatch_statement_completion(&self) -> Result<()> {
        let completion = std::mem::take(&mut *self.completion.borrow_mut());
        match completion {
            StatementCompletion::Idle => Ok(()),
            StatementCompletion::Commit => {
                for (_, observer) in self.observers.borrow_mut().iter_mut() {
                    observer.did_commit();
                }
                Ok(())
            }
            StatementCompletion::Rollback => {
                for (_, observer) in self.observers.borrow_mut().iter_mut() {
                    observer.did_rollback();
                }
                Ok(())
            }
            StatementCompletion::ErrorRollback(error) => {
                for (_, observer) in self.observers.borrow_mut().iter_mut() {
                    observer.did_rollback();
                }
                Err(error)
            }
        }
    }

    pub(crate) fn begin_compile_region(&self) {
        *self.compile_region.borrow_mut() = Some(DatabaseRegion::default());
    }

    pub(crate) fn take_compile_region(&self) -> DatabaseRegion {
        self.compile_region.borrow_mut().take().unwrap_or_default()
    }

    /// Unions a statement's compile-time region into the active selection
    /// scope, if one is open.
    pub(crate) fn record_selection(&self, region: &DatabaseRegion) {
        if let Some(selection) = self.selection.borrow_mut().as_mut() {
            selection.union(region);
        }
    }

    pub(crate) fn swap_selection(&self, next: Option<DatabaseRegion>) -> Option<DatabaseRegion> {
        self.selection.replace(next)
    }

    pub(crate) fn swap_authorizer(
        &self,
        next: Option<Box<dyn StatementAuthorizer>>,
    ) -> Option<Box<dyn StatementAuthorizer>> {
        self.authorizer.replace(next)
    }
}

/// Installs the commit, rollback, and update hooks, wired to `context`.
/// `context` must stay pinned for the lifetime of the database handle.
pub(crate) fn install_hooks(db: *mut sqlite3, context: *const HookContext) {
    let user_data = context as *mut c_void;
    unsafe {
        sqlite3_update_hook(db, Some(update_hook_trampoline), user_data);
        sqlite3_commit_hook(db, Some(commit_hook_trampoline), user_data);
        sqlite3_rollback_hook(db, Some(rollback_hook_trampoline), user_data);
    }
}

unsafe extern "C" fn update_hook_trampoline(
    user_data: *mut c_void,
    op: c_int,
    database: *const c_char,
    table: *const c_char,
    rowid: i64,
) {
    if user_data.is_null() || database.is_null() || table.is_null() {
        return;
    }

    let kind = match op {
        SQLITE_INSERT => ChangeKind::Insert,
        SQLITE_UPDATE => ChangeKind::Update,
        SQLITE_DELETE => ChangeKind::Delete,
        _ => return,
    };

    let context = &*(user_data as *const HookContext);
    let database = CStr::from_ptr(database).to_string_lossy();
    let table = CStr::from_ptr(table).to_string_lossy();

    let event = ChangeEvent {
        kind,
        database: &database,
        table: &table,
        rowid,
    };

    let _ = catch_unwind(AssertUnwindSafe(|| {
        for (_, observer) in context.observers.borrow_mut().iter_mut() {
            if observer.observes_table(event.table) {
                observer.on_change(&event);
            }
        }
    }));
}

unsafe extern "C" fn commit_hook_trampoline(user_data: *mut c_void) -> c_int {
    if user_data.is_null() {
        return 0;
    }
    let context = &*(user_data as *const HookContext);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for (_, observer) in context.observers.borrow_mut().iter_mut() {
            if let Err(error) = observer.will_commit() {
                return Err(error);
            }
        }
        Ok(())
    }));

    match outcome {
        Ok(Ok(())) => {
            *context.completion.borrow_mut() = StatementCompletion::Commit;
            0
        }
        Ok(Err(error)) => {
            *context.completion.borrow_mut() = StatementCompletion::ErrorRollback(error);
            // nonzero: the engine converts the COMMIT into a ROLLBACK
            1
        }
        Err(_) => {
            *context.completion.borrow_mut() = StatementCompletion::ErrorRollback(
                Error::Protocol("transaction observer panicked in will_commit".into()),
            );
            1
        }
    }
}

unsafe extern "C" fn rollback_hook_trampoline(user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    let context = &*(user_data as *const HookContext);

    let mut completion = context.completion.borrow_mut();
    // an observer veto already recorded the richer outcome
    if !matches!(*completion, StatementCompletion::ErrorRollback(_)) {
        *completion = StatementCompletion::Rollback;
    }
}
