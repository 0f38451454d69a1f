use crate::connection::Connection;
use crate::error::{Error, Result};

/// How a transaction acquires its locks.
///
/// `Deferred` waits for the first read or write; `Immediate` takes the write
/// lock up front; `Exclusive` additionally blocks new readers in rollback
/// journal modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionKind {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionKind {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            TransactionKind::Deferred => "BEGIN DEFERRED TRANSACTION",
            TransactionKind::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            TransactionKind::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

/// What a transaction or savepoint block wants done on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCompletion {
    Commit,
    Rollback,
}

// The single reserved savepoint name. SQLite's savepoint stack permits
// reusing one name for nesting.
const SAVEPOINT_BEGIN: &str = "SAVEPOINT quarry";
const SAVEPOINT_RELEASE: &str = "RELEASE SAVEPOINT quarry";
const SAVEPOINT_ROLLBACK: &str = "ROLLBACK TRANSACTION TO SAVEPOINT quarry";

impl Connection {
    /// Opens a transaction of the given kind, or the configured default.
    ///
    /// Fails if a transaction is already open; nest with
    /// [`in_savepoint`](Self::in_savepoint) instead.
    pub fn begin_transaction(&mut self, kind: Option<TransactionKind>) -> Result<()> {
        self.assert_owner();
        let kind = kind.unwrap_or(self.config.default_transaction_kind);
        self.execute_internal(kind.begin_sql())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.assert_owner();
        self.execute_internal("COMMIT TRANSACTION")
    }

    /// Rolls the current transaction back.
    ///
    /// When the engine has already auto-rolled-back (`SQLITE_FULL`, `IOERR`,
    /// `BUSY`, `NOMEM`, `INTERRUPT`), there is nothing left to roll back and
    /// this is a no-op, so the error that caused the auto-rollback survives
    /// instead of a useless "no transaction is active".
    pub fn rollback(&mut self) -> Result<()> {
        self.assert_owner();
        if !self.is_autocommit() {
            self.execute_internal("ROLLBACK TRANSACTION")?;
        }
        Ok(())
    }

    /// Whether the engine currently has a transaction open.
    pub fn is_inside_transaction(&self) -> bool {
        self.assert_owner();
        !self.is_autocommit()
    }

    /// Runs `f` inside a transaction of the given kind (or the configured
    /// default), committing or rolling back according to the returned
    /// [`TransactionCompletion`]. An error from `f` rolls back and
    /// propagates; an error from the compensating rollback itself is
    /// swallowed so the first error survives.
    ///
    /// Not reentrant: opening a transaction inside a transaction fails.
    /// Nesting goes through [`in_savepoint`](Self::in_savepoint).
    ///
    /// If the engine rolls the transaction back underneath the block (an
    /// interrupt, or `ON CONFLICT ROLLBACK`), every further statement inside
    /// the block fails with [`Error::TransactionAborted`], and so does the
    /// final commit.
    pub fn in_transaction<F>(&mut self, kind: Option<TransactionKind>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Connection) -> Result<TransactionCompletion>,
    {
        self.assert_owner();
        self.begin_transaction(kind)?;

        let was_inside = self.inside_transaction_block;
        self.inside_transaction_block = true;

        match f(self) {
            Ok(TransactionCompletion::Commit) => {
                // the transaction may be gone despite the block finishing
                // cleanly: re-check before committing so the caller sees
                // ABORT rather than "no transaction is active"
                if self.is_autocommit() {
                    self.inside_transaction_block = was_inside;
                    return Err(Error::TransactionAborted);
                }

                // leave the block before COMMIT so that transaction
                // observers may run statements from their hooks
                self.inside_transaction_block = was_inside;
                self.commit()
            }
            Ok(TransactionCompletion::Rollback) => {
                self.inside_transaction_block = was_inside;
                self.rollback()
            }
            Err(error) => {
                self.inside_transaction_block = was_inside;
                let _ = self.rollback();
                Err(error)
            }
        }
    }

    /// Runs `f` inside a savepoint. Reentrant.
    ///
    /// With no transaction open, the top-level savepoint is promoted to a
    /// `BEGIN … COMMIT` pair honoring the configured default kind; this also
    /// sidesteps an engine anomaly where a top-level savepoint does not
    /// return to autocommit after an observer-forced rollback.
    pub fn in_savepoint<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Connection) -> Result<TransactionCompletion>,
    {
        self.assert_owner();

        if self.is_autocommit() {
            return self.in_transaction(None, f);
        }

        self.execute_internal(SAVEPOINT_BEGIN)?;

        match f(self) {
            Ok(TransactionCompletion::Commit) => self.execute_internal(SAVEPOINT_RELEASE),
            Ok(TransactionCompletion::Rollback) => {
                // rollback alone does not pop the entry off the engine's
                // savepoint stack; the release is required
                self.execute_internal(SAVEPOINT_ROLLBACK)?;
                self.execute_internal(SAVEPOINT_RELEASE)
            }
            Err(error) => {
                let _ = self.execute_internal(SAVEPOINT_ROLLBACK);
                let _ = self.execute_internal(SAVEPOINT_RELEASE);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_sql_names_the_kind() {
        assert_eq!(
            TransactionKind::Deferred.begin_sql(),
            "BEGIN DEFERRED TRANSACTION"
        );
        assert_eq!(
            TransactionKind::Immediate.begin_sql(),
            "BEGIN IMMEDIATE TRANSACTION"
        );
        assert_eq!(
            TransactionKind::Exclusive.begin_sql(),
            "BEGIN EXCLUSIVE TRANSACTION"
        );
    }

    #[test]
    fn savepoint_statements_agree_on_the_name() {
        assert!(SAVEPOINT_BEGIN.ends_with("quarry"));
        assert!(SAVEPOINT_RELEASE.ends_with("quarry"));
        assert!(SAVEPOINT_ROLLBACK.ends_with("quarry"));
    }
}
