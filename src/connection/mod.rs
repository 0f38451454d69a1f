use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use either::Either;
use libsqlite3_sys::{sqlite3, SQLITE_SCHEMA};

use crate::arguments::Arguments;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::schema::cache::SchemaCache;
use crate::statement::cache::StatementCache;
use crate::statement::Statement;
use crate::value::FromValue;

pub(crate) mod authorizer;
pub(crate) mod backup;
pub(crate) mod collation;
pub(crate) mod establish;
pub(crate) mod execute;
pub(crate) mod function;
pub(crate) mod handle;
pub(crate) mod observation;
pub(crate) mod suspension;
pub(crate) mod trace;
pub(crate) mod transaction;

use establish::{BusyHandlerCtx, EstablishParams};
use execute::ExecuteIter;
use handle::ConnectionHandle;
use observation::{HookContext, ObserverHandle, TransactionObserver};
use suspension::{SuspensionHandle, SuspensionState};
use trace::TraceContext;

/// Statements the library issues on its own behalf cap out small; user
/// statements get the configurable cache.
const INTERNAL_STATEMENT_CACHE_CAPACITY: usize = 20;

/// A connection to a SQLite database.
///
/// The connection exclusively owns the native handle, both statement caches,
/// and the schema cache, and it must only ever be used from the thread that
/// opened it; every entry point asserts this and panics on violation. Run
/// connections on separate threads for parallelism; SQLite's own locking
/// coordinates them.
pub struct Connection {
    pub(crate) handle: ConnectionHandle,
    pub(crate) config: Config,

    // caches of semi-persistent statements: user SQL and library SQL
    pub(crate) statements: StatementCache,
    pub(crate) internal_statements: StatementCache,

    // most recent non-persistent (batch) statement
    pub(crate) batch_statement: Option<Statement>,

    pub(crate) schema_cache: SchemaCache,
    pub(crate) last_schema_version: Option<i32>,

    pub(crate) read_only_depth: usize,
    pub(crate) inside_transaction_block: bool,

    /// Heap-pinned state the engine's C callbacks reach through raw
    /// user-data pointers; must not be replaced after setup.
    pub(crate) hooks: Box<HookContext>,

    /// The only cross-thread state; see [`suspension`].
    pub(crate) suspension: Arc<SuspensionState>,

    // registration bookkeeping, keyed the way the engine keys identities
    pub(crate) functions: HashSet<(String, Option<u32>)>,
    pub(crate) collations: HashSet<String>,

    // retained callback contexts; the engine holds raw pointers into these
    pub(crate) busy_handler: Option<Box<BusyHandlerCtx>>,
    pub(crate) trace: Option<Box<TraceContext>>,

    owner: ThreadId,
}

impl Connection {
    /// Opens (and with `create_if_missing`, creates) the database at `path`
    /// and runs the setup sequence.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Connection> {
        let params = EstablishParams::from_path(path.as_ref(), &config, false)?;
        Self::establish(params, config)
    }

    /// Opens a fresh private in-memory database.
    pub fn open_in_memory(config: Config) -> Result<Connection> {
        let params = EstablishParams::from_path(Path::new(":memory:"), &config, true)?;
        Self::establish(params, config)
    }

    fn establish(params: EstablishParams, config: Config) -> Result<Connection> {
        let handle = params.establish()?;
        let suspension = Arc::new(SuspensionState::new(handle.shared_ptr()));
        let statement_cache_capacity = config.statement_cache_capacity.max(1);

        let mut conn = Connection {
            handle,
            config,
            statements: StatementCache::new(statement_cache_capacity),
            internal_statements: StatementCache::new(INTERNAL_STATEMENT_CACHE_CAPACITY),
            batch_statement: None,
            schema_cache: SchemaCache::default(),
            last_schema_version: None,
            read_only_depth: 0,
            inside_transaction_block: false,
            hooks: Box::new(HookContext::new()),
            suspension,
            functions: HashSet::new(),
            collations: HashSet::new(),
            busy_handler: None,
            trace: None,
            owner: thread::current().id(),
        };

        // a failure here drops `conn`, which closes the handle via close_v2
        establish::setup(&mut conn)?;

        Ok(conn)
    }

    /// Every entry point runs on the thread that opened the connection; this
    /// is the sole mechanism preventing data races on the native handle and
    /// the caches. Violations are programmer errors and fatal.
    #[track_caller]
    pub(crate) fn assert_owner(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "connection accessed from a thread other than its owner",
        );
    }

    /// Returns the underlying `sqlite3*` handle.
    pub fn as_raw_handle(&mut self) -> *mut sqlite3 {
        self.assert_owner();
        self.handle.as_ptr()
    }

    /// Explicit close. Fails when statements are still running; the deferred
    /// close on drop never fails visibly.
    pub fn close(mut self) -> Result<()> {
        self.assert_owner();
        self.statements.clear();
        self.internal_statements.clear();
        self.batch_statement = None;
        self.schema_cache.clear();
        self.handle.close()
    }

    /// Runs a single (or multi-) statement query, returning the total
    /// changed-row count.
    pub fn execute(&mut self, sql: &str, args: Arguments) -> Result<u64> {
        self.assert_owner();
        let result = execute::iter(self, sql, Some(args), true, false)
            .and_then(ExecuteIter::finish);
        self.after_statement(result)
    }

    /// Runs every statement in `sql` through an uncached container,
    /// returning the total changed-row count. Inserted rowids are ignored.
    pub fn execute_batch(&mut self, sql: &str) -> Result<u64> {
        self.assert_owner();
        let result = execute::iter(self, sql, None, false, false).and_then(ExecuteIter::finish);
        self.after_statement(result)
    }

    /// Fetches every row of the query.
    pub fn query_rows(&mut self, sql: &str, args: Arguments) -> Result<Vec<Row>> {
        self.assert_owner();
        let result = (|| {
            let mut rows = Vec::new();
            for step in execute::iter(self, sql, Some(args), true, false)? {
                if let Either::Right(row) = step? {
                    rows.push(row);
                }
            }
            Ok(rows)
        })();
        self.after_statement(result)
    }

    /// Fetches the first row of the query, if any.
    pub fn query_row(&mut self, sql: &str, args: Arguments) -> Result<Option<Row>> {
        self.assert_owner();
        let result = (|| {
            for step in execute::iter(self, sql, Some(args), true, false)? {
                if let Either::Right(row) = step? {
                    return Ok(Some(row));
                }
            }
            Ok(None)
        })();
        self.after_statement(result)
    }

    /// Fetches the first column of the first row, decoded as `T`.
    pub fn query_value<T: FromValue>(&mut self, sql: &str, args: Arguments) -> Result<Option<T>> {
        match self.query_row(sql, args)? {
            Some(row) => row.get(0).map(Some),
            None => Ok(None),
        }
    }

    /// A streaming cursor over the query's rows.
    pub fn rows<'c>(&'c mut self, sql: &'c str, args: Arguments) -> Result<Rows<'c>> {
        self.assert_owner();
        Ok(Rows {
            inner: execute::iter(self, sql, Some(args), true, false)?,
        })
    }

    /// Runs library-issued SQL through the internal statement cache.
    pub(crate) fn execute_internal(&mut self, sql: &str) -> Result<()> {
        let result = execute::iter(self, sql, None, true, true)
            .and_then(ExecuteIter::finish)
            .map(drop);
        self.after_statement(result)
    }

    pub(crate) fn query_all_internal(&mut self, sql: &str) -> Result<Vec<Row>> {
        let result = (|| {
            let mut rows = Vec::new();
            for step in execute::iter(self, sql, None, true, true)? {
                if let Either::Right(row) = step? {
                    rows.push(row);
                }
            }
            Ok(rows)
        })();
        self.after_statement(result)
    }

    pub(crate) fn query_value_internal<T: FromValue>(&mut self, sql: &str) -> Result<Option<T>> {
        match self.query_all_internal(sql)?.into_iter().next() {
            Some(row) => row.get(0).map(Some),
            None => Ok(None),
        }
    }

    /// A statement failing with `SQLITE_SCHEMA` exhausted the engine's
    /// bounded auto-recompilation; both statement caches must go.
    fn after_statement<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(Error::Sqlite(error)) = &result {
            if error.code() == SQLITE_SCHEMA {
                self.statements.clear();
                self.internal_statements.clear();
            }
        }
        result
    }

    /// The number of statements in the user cache.
    pub fn cached_statements_count(&self) -> usize {
        self.statements.len()
    }

    /// The rowid of the most recent successful INSERT on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        self.assert_owner();
        self.handle.last_insert_rowid()
    }

    /// Runs `f` with the connection in `PRAGMA query_only` mode, restoring
    /// writability on every exit path. Nests; the pragma toggles only on the
    /// outermost transition. A connection opened read-only bypasses the
    /// pragma entirely.
    pub fn read_only<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        self.begin_read_only()?;
        let result = f(self);
        let restored = self.end_read_only();
        match result {
            Ok(value) => restored.map(|()| value),
            Err(error) => Err(error),
        }
    }

    pub fn begin_read_only(&mut self) -> Result<()> {
        self.assert_owner();
        if self.config.read_only {
            return Ok(());
        }
        if self.read_only_depth == 0 {
            self.execute_internal("PRAGMA query_only = 1")?;
        }
        self.read_only_depth += 1;
        Ok(())
    }

    pub fn end_read_only(&mut self) -> Result<()> {
        self.assert_owner();
        if self.config.read_only {
            return Ok(());
        }
        assert!(self.read_only_depth > 0, "unbalanced end_read_only");
        self.read_only_depth -= 1;
        if self.read_only_depth == 0 {
            self.execute_internal("PRAGMA query_only = 0")?;
        }
        Ok(())
    }

    /// Marks the connection suspended and interrupts any in-flight
    /// statement. Until [`resume`](Self::resume), statements that could
    /// acquire a file lock fail with [`Error::Suspended`]; WAL reads and
    /// lock-releasing statements still run. Callable from any thread.
    pub fn suspend(&self) {
        self.suspension.suspend();
    }

    /// Lifts the suspension. Callable from any thread; idempotent.
    pub fn resume(&self) {
        self.suspension.resume();
    }

    /// A cloneable handle that suspends and resumes this connection from
    /// other threads, outliving borrows of the connection itself.
    pub fn suspension_handle(&self) -> SuspensionHandle {
        SuspensionHandle(Arc::clone(&self.suspension))
    }

    /// Whether host-platform resource-pressure notifications are expected to
    /// drive [`suspend`](Self::suspend)/[`resume`](Self::resume).
    pub fn observes_suspension_notifications(&self) -> bool {
        self.config.observes_suspension_notifications
    }

    /// Registers `observer` for transaction lifecycle events on this
    /// connection.
    pub fn add_transaction_observer(
        &mut self,
        observer: Box<dyn TransactionObserver>,
    ) -> ObserverHandle {
        self.assert_owner();
        self.hooks.add_observer(observer)
    }

    /// Removes a registered observer; returns whether it was present.
    pub fn remove_transaction_observer(&mut self, handle: ObserverHandle) -> bool {
        self.assert_owner();
        self.hooks.remove_observer(handle)
    }

    pub(crate) fn is_autocommit(&self) -> bool {
        self.handle.is_autocommit()
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("inside_transaction_block", &self.inside_transaction_block)
            .field("read_only_depth", &self.read_only_depth)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // finalize all statements before the handle's own close_v2 runs
        self.statements.clear();
        self.internal_statements.clear();
        self.batch_statement = None;
    }
}

/// A streaming cursor over query rows; completed inner statements are
/// skipped transparently.
pub struct Rows<'c> {
    inner: ExecuteIter<'c>,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(Either::Right(row)) => return Some(Ok(row)),
                Ok(Either::Left(_)) => continue,
                Err(error) => return Some(Err(error)),
            }
        }
    }
}
