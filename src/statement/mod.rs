use std::cmp;
use std::collections::HashMap;
use std::os::raw::c_char;
use std::ptr::{null, null_mut, NonNull};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use libsqlite3_sys::{
    sqlite3, sqlite3_prepare_v3, sqlite3_stmt, SQLITE_OK, SQLITE_PREPARE_PERSISTENT,
};
use smallvec::SmallVec;

use crate::connection::handle::ConnectionHandle;
use crate::connection::observation::HookContext;
use crate::error::{Error, Result, SqliteError};
use crate::region::DatabaseRegion;

pub(crate) mod cache;
pub(crate) mod handle;

use handle::StatementHandle;

// A `Statement` covers *zero* or more raw SQLite3 statements. The SQL is
// chopped up on `;` lazily, so multiple statements in one query are
// supported.

#[derive(Debug)]
pub(crate) struct Statement {
    persistent: bool,

    /// the current index of the actual statement that is executing;
    /// if `None`, no statement is executing and `prepare_next()` must be
    /// called; if `Some(self.handles.len())` and `self.tail.is_empty()`,
    /// there are no more statements to execute and `reset()` must be called
    index: Option<usize>,

    /// tail of the most recently prepared SQL statement within this container
    tail: Bytes,

    /// underlying sqlite handles for each inner statement;
    /// a [`SmallVec`] optimizes for the most likely case of a single statement
    pub(crate) handles: SmallVec<[StatementHandle; 1]>,

    // each set of column names, ordered and indexed
    pub(crate) columns: SmallVec<[Arc<Vec<String>>; 1]>,
    pub(crate) column_indices: SmallVec<[Arc<HashMap<String, usize>>; 1]>,

    /// tables read by this statement, recorded by the authorizer at compile
    /// time and replayed on every execution under an active selection scope
    pub(crate) region: DatabaseRegion,
}

pub(crate) struct PreparedStatement<'a> {
    pub(crate) handle: &'a mut StatementHandle,
    pub(crate) columns: &'a Arc<Vec<String>>,
    pub(crate) column_indices: &'a Arc<HashMap<String, usize>>,
}

impl Statement {
    pub(crate) fn new(mut query: &str, persistent: bool) -> Result<Self> {
        query = query.trim();

        if query.len() > i32::MAX as usize {
            return Err(Error::Protocol(format!(
                "query string must be smaller than {} bytes",
                i32::MAX
            )));
        }

        Ok(Self {
            persistent,
            tail: Bytes::from(String::from(query)),
            handles: SmallVec::with_capacity(1),
            index: None,
            columns: SmallVec::with_capacity(1),
            column_indices: SmallVec::with_capacity(1),
            region: DatabaseRegion::default(),
        })
    }

    /// Advances to the next inner statement, compiling it from the tail when
    /// necessary. Returns `false` when the query is exhausted.
    pub(crate) fn prepare_next(
        &mut self,
        conn: &ConnectionHandle,
        hooks: &HookContext,
    ) -> Result<bool> {
        // increment `self.index` up to `self.handles.len()`
        self.index = self
            .index
            .map(|index| cmp::min(index + 1, self.handles.len()))
            .or(Some(0));

        while self.handles.len() <= self.index.unwrap_or(0) {
            if self.tail.is_empty() {
                return Ok(false);
            }

            // the permanent authorizer records the tables this statement
            // reads while it compiles
            hooks.begin_compile_region();
            let compiled = self.compile_front(conn.as_ptr());
            let region = hooks.take_compile_region();

            if let Some(statement) = compiled? {
                let count = statement.column_count();

                let mut columns = Vec::with_capacity(count);
                let mut column_indices = HashMap::with_capacity(count);

                for i in 0..count {
                    let name = statement.column_name(i);
                    columns.push(name.clone());
                    column_indices.insert(name, i);
                }

                self.handles.push(statement);
                self.columns.push(Arc::new(columns));
                self.column_indices.push(Arc::new(column_indices));
                self.region.union(&region);
            }
        }

        Ok(self.index.is_some_and(|index| index < self.handles.len()))
    }

    pub(crate) fn current(&mut self) -> Option<PreparedStatement<'_>> {
        self.index
            .filter(|&index| index < self.handles.len())
            .map(move |index| PreparedStatement {
                handle: &mut self.handles[index],
                columns: &self.columns[index],
                column_indices: &self.column_indices[index],
            })
    }

    /// Compiles the leading statement out of the remaining SQL and trims it
    /// off the tail. The engine compiles one statement per call; stretches
    /// of whitespace or bare comments compile to nothing and are consumed
    /// until something runnable turns up or the tail runs dry.
    ///
    /// <https://www.sqlite.org/c3ref/prepare.html>
    fn compile_front(&mut self, db: *mut sqlite3) -> Result<Option<StatementHandle>> {
        // hint to the query planner that cached statements stick around
        let flags = if self.persistent {
            SQLITE_PREPARE_PERSISTENT as u32
        } else {
            0
        };

        while !self.tail.is_empty() {
            let head = self.tail.as_ptr() as *const c_char;
            let mut compiled: *mut sqlite3_stmt = null_mut();
            let mut rest: *const c_char = null();

            let status = unsafe {
                sqlite3_prepare_v3(
                    db,
                    head,
                    self.tail.len() as i32,
                    flags,
                    &mut compiled,
                    &mut rest,
                )
            };
            if status != SQLITE_OK {
                return Err(SqliteError::new(db).into());
            }

            // `rest` lands on the byte after the compiled statement
            self.tail.advance(rest as usize - head as usize);

            if let Some(handle) = NonNull::new(compiled) {
                return Ok(Some(StatementHandle::new(handle)));
            }
        }

        Ok(None)
    }

    pub(crate) fn reset(&mut self) {
        self.index = None;

        for handle in self.handles.iter_mut() {
            handle.reset();
            handle.clear_bindings();
        }
    }
}

/// Whether running this statement can only ever *release* a database lock.
///
/// `COMMIT`/`END`, `ROLLBACK` (including `ROLLBACK TO SAVEPOINT`), and
/// `RELEASE` never take a new lock, so the suspension gate lets them through.
pub(crate) fn releases_database_lock(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    keyword.eq_ignore_ascii_case("COMMIT")
        || keyword.eq_ignore_ascii_case("END")
        || keyword.eq_ignore_ascii_case("ROLLBACK")
        || keyword.eq_ignore_ascii_case("RELEASE")
}
