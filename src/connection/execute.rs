use either::Either;

use crate::arguments::Arguments;
use crate::connection::handle::ConnectionHandle;
use crate::connection::observation::HookContext;
use crate::connection::suspension::{check_suspension_violation, SuspensionState};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::logger::QueryLogger;
use crate::row::Row;
use crate::statement::Statement;

/// The single statement-execution pipeline.
///
/// Every statement a connection runs goes through here: cache lookup,
/// aborted-transaction check, suspension check, binding, stepping, and
/// commit/rollback observation dispatch. Yields `Right(row)` for each result
/// row and `Left(changes)` when an inner statement runs to completion.
pub(crate) struct ExecuteIter<'a> {
    handle: &'a mut ConnectionHandle,
    statement: &'a mut Statement,
    hooks: &'a HookContext,
    suspension: &'a SuspensionState,
    logger: QueryLogger<'a>,
    args: Option<Arguments>,

    /// a query can span multiple statements; this tracks how much of the
    /// argument list the previous statements consumed
    args_used: usize,

    inside_transaction_block: bool,
    goto_next: bool,
    changes: u64,
}

pub(crate) fn iter<'c>(
    conn: &'c mut Connection,
    sql: &'c str,
    args: Option<Arguments>,
    persistent: bool,
    internal: bool,
) -> Result<ExecuteIter<'c>> {
    let Connection {
        handle,
        statements,
        internal_statements,
        batch_statement,
        hooks,
        suspension,
        inside_transaction_block,
        config,
        ..
    } = conn;

    // fetch the cached statement or allocate a new one
    let statement = if internal {
        internal_statements.get_or_prepare(sql)?
    } else if persistent {
        statements.get_or_prepare(sql)?
    } else {
        batch_statement.insert(Statement::new(sql, false)?)
    };

    let logger = QueryLogger::new(sql, config.log_settings.clone());

    Ok(ExecuteIter {
        handle,
        statement,
        hooks: &**hooks,
        suspension: &**suspension,
        logger,
        args,
        args_used: 0,
        inside_transaction_block: *inside_transaction_block,
        goto_next: true,
        changes: 0,
    })
}

impl ExecuteIter<'_> {
    /// Runs the remaining statements to completion and reports the total
    /// changed-row count.
    pub(crate) fn finish(mut self) -> Result<u64> {
        for result in &mut self {
            let _ = result?;
        }
        Ok(self.changes)
    }
}

impl Iterator for ExecuteIter<'_> {
    type Item = Result<Either<u64, Row>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.goto_next {
            match self.statement.prepare_next(self.handle, self.hooks) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(error) => return Some(Err(error)),
            }
            self.goto_next = false;

            // replay the compile-time region into an active recording scope
            self.hooks.record_selection(&self.statement.region);

            let Some(prepared) = self.statement.current() else {
                return None;
            };

            // sanity check: ensure the VM is reset and the bindings are cleared
            prepared.handle.reset();
            prepared.handle.clear_bindings();

            // a transaction block whose transaction the engine already
            // rolled back must not run further statements
            if self.inside_transaction_block && self.handle.is_autocommit() {
                return Some(Err(Error::TransactionAborted));
            }

            if let Err(error) =
                check_suspension_violation(self.handle, self.suspension, prepared.handle)
            {
                return Some(Err(error));
            }

            if let Some(args) = &self.args {
                match args.bind(prepared.handle, self.args_used) {
                    Ok(used) => self.args_used += used,
                    Err(error) => return Some(Err(error)),
                }
            }
        }

        let Some(prepared) = self.statement.current() else {
            return None;
        };

        match prepared.handle.step() {
            Ok(true) => {
                let values = (0..prepared.handle.column_count())
                    .map(|index| prepared.handle.column_value(index))
                    .collect();

                self.logger.increment_rows_returned();

                Some(Ok(Either::Right(Row {
                    values,
                    columns: prepared.columns.clone(),
                    column_indices: prepared.column_indices.clone(),
                })))
            }
            Ok(false) => {
                let changes = prepared.handle.changes();
                self.logger.increase_rows_affected(changes);
                self.changes += changes;
                self.goto_next = true;

                // commit/rollback hooks may have fired during this step
                if let Err(error) = self.hooks.dispatch_statement_completion() {
                    return Some(Err(error));
                }

                Some(Ok(Either::Left(changes)))
            }
            Err(sqlite_error) => {
                let error = Error::Sqlite(sqlite_error.with_sql(self.logger.sql()));

                // a commit-hook veto shows up as a constraint error from the
                // engine; the observer's own error replaces it
                match self.hooks.dispatch_statement_completion() {
                    Err(observer_error) => Some(Err(observer_error)),
                    Ok(()) => Some(Err(error)),
                }
            }
        }
    }
}

impl Drop for ExecuteIter<'_> {
    fn drop(&mut self) {
        self.statement.reset();
    }
}
