use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::trace::TraceOptions;
use crate::connection::transaction::TransactionKind;
use crate::connection::Connection;
use crate::error::Result;

/// How the connection reacts when another connection holds a conflicting lock.
#[derive(Clone)]
pub enum BusyMode {
    /// Fail immediately with `SQLITE_BUSY`.
    ImmediateError,
    /// Let the engine retry with its built-in backoff for up to this long.
    Timeout(BusyTimeout),
    /// Invoke the callback with the number of prior invocations for this lock
    /// contention; return `false` to give up with `SQLITE_BUSY`.
    Callback(Arc<dyn Fn(u32) -> bool + Send + Sync>),
}

impl Default for BusyMode {
    fn default() -> Self {
        BusyMode::Timeout(BusyTimeout::default())
    }
}

/// A busy-handler timeout; defaults to 5 seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusyTimeout(pub Duration);

impl Default for BusyTimeout {
    fn default() -> Self {
        BusyTimeout(Duration::from_secs(5))
    }
}

impl Debug for BusyMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BusyMode::ImmediateError => f.write_str("ImmediateError"),
            BusyMode::Timeout(timeout) => f.debug_tuple("Timeout").field(&timeout.0).finish(),
            BusyMode::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Statement-logging levels and the slow-statement threshold.
#[derive(Clone, Debug)]
pub struct LogSettings {
    pub statements_level: log::LevelFilter,
    pub slow_statements_level: log::LevelFilter,
    pub slow_statements_duration: Duration,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            statements_level: log::LevelFilter::Debug,
            slow_statements_level: log::LevelFilter::Warn,
            slow_statements_duration: Duration::from_secs(1),
        }
    }
}

type PrepareHook = Arc<dyn Fn(&mut Connection) -> Result<()> + Send + Sync>;

/// Options and flags configuring a [`Connection`].
///
/// # Example
///
/// ```no_run
/// use quarry::{Config, Connection, TransactionKind};
///
/// # fn main() -> quarry::Result<()> {
/// let config = Config::new()
///     .foreign_keys(true)
///     .default_transaction_kind(TransactionKind::Immediate);
/// let conn = Connection::open("data.db", config)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Config {
    pub(crate) read_only: bool,
    pub(crate) create_if_missing: bool,
    pub(crate) foreign_keys: bool,
    pub(crate) default_transaction_kind: TransactionKind,
    pub(crate) busy_mode: BusyMode,
    pub(crate) accepts_double_quoted_string_literals: bool,
    pub(crate) observes_suspension_notifications: bool,
    pub(crate) trace_options: TraceOptions,
    pub(crate) statement_cache_capacity: usize,
    pub(crate) log_settings: LogSettings,
    pub(crate) prepare_database: Option<PrepareHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Construct `Self` with default options.
    ///
    /// See the source of this method for the current defaults.
    pub fn new() -> Self {
        Self {
            read_only: false,
            create_if_missing: true,
            foreign_keys: true,
            default_transaction_kind: TransactionKind::Deferred,
            busy_mode: BusyMode::default(),
            accepts_double_quoted_string_literals: false,
            observes_suspension_notifications: false,
            trace_options: TraceOptions::empty(),
            statement_cache_capacity: 100,
            log_settings: LogSettings::default(),
            prepare_database: None,
        }
    }

    /// Open the database without write capability.
    pub fn read_only(mut self, on: bool) -> Self {
        self.read_only = on;
        self
    }

    /// Create the database file if it does not yet exist. Defaults to `true`.
    pub fn create_if_missing(mut self, on: bool) -> Self {
        self.create_if_missing = on;
        self
    }

    /// Run `PRAGMA foreign_keys = ON` during setup. Defaults to `true`.
    pub fn foreign_keys(mut self, on: bool) -> Self {
        self.foreign_keys = on;
        self
    }

    /// The transaction kind used when none is requested explicitly.
    pub fn default_transaction_kind(mut self, kind: TransactionKind) -> Self {
        self.default_transaction_kind = kind;
        self
    }

    pub fn busy_mode(mut self, mode: BusyMode) -> Self {
        self.busy_mode = mode;
        self
    }

    /// Shorthand for [`BusyMode::Timeout`].
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_mode = BusyMode::Timeout(BusyTimeout(timeout));
        self
    }

    /// Whether the engine treats `"double quoted"` strings as literals.
    /// Defaults to `false`; the quirk exists for historical compatibility.
    pub fn accepts_double_quoted_string_literals(mut self, on: bool) -> Self {
        self.accepts_double_quoted_string_literals = on;
        self
    }

    /// Whether host-platform resource-pressure notifications should drive
    /// [`suspend`](Connection::suspend) / [`resume`](Connection::resume).
    pub fn observes_suspension_notifications(mut self, on: bool) -> Self {
        self.observes_suspension_notifications = on;
        self
    }

    /// Trace events to emit through the default `tracing` sink from setup
    /// onwards. Empty (the default) installs no trace callback.
    pub fn trace_options(mut self, options: TraceOptions) -> Self {
        self.trace_options = options;
        self
    }

    /// Capacity of the cache for user statements. Values below 1 are clamped;
    /// library-issued statements use a separate cache.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity.max(1);
        self
    }

    /// Log level for completed statements.
    pub fn log_statements(mut self, level: log::LevelFilter) -> Self {
        self.log_settings.statements_level = level;
        self
    }

    /// Log level and threshold for slow statements.
    pub fn log_slow_statements(mut self, level: log::LevelFilter, duration: Duration) -> Self {
        self.log_settings.slow_statements_level = level;
        self.log_settings.slow_statements_duration = duration;
        self
    }

    /// A hook run as the last setup step, before the file-format validation
    /// query. Use it to register functions or run pragmas on every new
    /// connection.
    pub fn prepare_database(
        mut self,
        hook: impl Fn(&mut Connection) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.prepare_database = Some(Arc::new(hook));
        self
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("read_only", &self.read_only)
            .field("create_if_missing", &self.create_if_missing)
            .field("foreign_keys", &self.foreign_keys)
            .field("default_transaction_kind", &self.default_transaction_kind)
            .field("busy_mode", &self.busy_mode)
            .field(
                "accepts_double_quoted_string_literals",
                &self.accepts_double_quoted_string_literals,
            )
            .field(
                "observes_suspension_notifications",
                &self.observes_suspension_notifications,
            )
            .field("trace_options", &self.trace_options)
            .field("statement_cache_capacity", &self.statement_cache_capacity)
            .finish_non_exhaustive()
    }
}
