use anyhow::Result;
use quarry::{params, Config, Connection, Error, TransactionCompletion, TransactionKind};

fn setup() -> Result<Connection> {
    let mut conn = Connection::open_in_memory(Config::new())?;
    conn.execute_batch("CREATE TABLE t(a INTEGER)")?;
    Ok(conn)
}

#[test]
fn commit_makes_changes_visible() -> Result<()> {
    let mut conn = setup()?;

    conn.in_transaction(None, |conn| {
        conn.execute("INSERT INTO t VALUES (1)", params![])?;
        assert!(conn.is_inside_transaction());
        Ok(TransactionCompletion::Commit)
    })?;

    assert!(!conn.is_inside_transaction());
    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(1));
    Ok(())
}

#[test]
fn rollback_discards_changes() -> Result<()> {
    let mut conn = setup()?;

    conn.in_transaction(Some(TransactionKind::Immediate), |conn| {
        conn.execute("INSERT INTO t VALUES (1)", params![])?;
        Ok(TransactionCompletion::Rollback)
    })?;

    assert!(!conn.is_inside_transaction());
    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(0));
    Ok(())
}

#[test]
fn block_errors_roll_back_and_propagate() -> Result<()> {
    let mut conn = setup()?;

    let result = conn.in_transaction(None, |conn| {
        conn.execute("INSERT INTO t VALUES (1)", params![])?;
        Err(Error::Protocol("boom".into()))
    });

    match result {
        Err(Error::Protocol(message)) => assert_eq!(message, "boom"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!conn.is_inside_transaction());
    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(0));
    Ok(())
}

#[test]
fn transactions_do_not_nest() -> Result<()> {
    let mut conn = setup()?;

    let result = conn.in_transaction(None, |conn| {
        conn.begin_transaction(None)?;
        Ok(TransactionCompletion::Commit)
    });
    assert!(result.is_err());
    Ok(())
}

#[test]
fn explicit_begin_commit_rollback() -> Result<()> {
    let mut conn = setup()?;

    conn.begin_transaction(Some(TransactionKind::Exclusive))?;
    conn.execute("INSERT INTO t VALUES (1)", params![])?;
    conn.commit()?;

    conn.begin_transaction(None)?;
    conn.execute("INSERT INTO t VALUES (2)", params![])?;
    conn.rollback()?;

    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(1));
    Ok(())
}

#[test]
fn rollback_after_engine_auto_rollback_is_a_no_op() -> Result<()> {
    let mut conn = setup()?;
    // nothing open: still fine
    conn.rollback()?;
    Ok(())
}

#[test]
fn statements_after_an_engine_rollback_fail_with_abort() -> Result<()> {
    let mut conn = Connection::open_in_memory(Config::new())?;
    conn.execute_batch("CREATE TABLE t(a INTEGER UNIQUE ON CONFLICT ROLLBACK)")?;
    conn.execute("INSERT INTO t VALUES (1)", params![])?;

    let result = conn.in_transaction(None, |conn| {
        // the conflict makes the engine roll the whole transaction back
        let conflict = conn.execute("INSERT INTO t VALUES (1)", params![]);
        assert!(conflict.is_err());

        // any further statement inside the dead block must abort
        let aborted = conn.execute("INSERT INTO t VALUES (2)", params![]);
        assert!(matches!(aborted, Err(Error::TransactionAborted)));

        Ok(TransactionCompletion::Commit)
    });

    // the pre-commit re-check reports the abort rather than the engine's
    // "no transaction is active"
    assert!(matches!(result, Err(Error::TransactionAborted)));
    assert!(!conn.is_inside_transaction());

    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(1));
    Ok(())
}

#[test]
fn top_level_savepoint_is_promoted_to_a_transaction() -> Result<()> {
    let mut conn = setup()?;

    conn.in_savepoint(|conn| {
        conn.execute("INSERT INTO t VALUES (1)", params![])?;
        assert!(conn.is_inside_transaction());
        Ok(TransactionCompletion::Commit)
    })?;

    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(1));
    Ok(())
}

#[test]
fn savepoint_rollback_leaves_the_outer_transaction_alive() -> Result<()> {
    let mut conn = setup()?;

    conn.in_transaction(None, |conn| {
        conn.execute("INSERT INTO t VALUES (1)", params![])?;

        conn.in_savepoint(|conn| {
            conn.execute("INSERT INTO t VALUES (2)", params![])?;
            Ok(TransactionCompletion::Rollback)
        })?;

        // the rollback popped the savepoint off the engine's stack entirely
        let release = conn.execute("RELEASE SAVEPOINT quarry", params![]);
        assert!(release.is_err());

        // and the outer transaction is still commitable
        conn.execute("INSERT INTO t VALUES (3)", params![])?;
        Ok(TransactionCompletion::Commit)
    })?;

    let values = conn.query_rows("SELECT a FROM t ORDER BY a", params![])?;
    let values: Vec<i64> = values.iter().map(|row| row.get(0)).collect::<quarry::Result<_>>()?;
    assert_eq!(values, vec![1, 3]);
    Ok(())
}

#[test]
fn savepoints_nest() -> Result<()> {
    let mut conn = setup()?;

    conn.in_transaction(None, |conn| {
        conn.in_savepoint(|conn| {
            conn.execute("INSERT INTO t VALUES (1)", params![])?;
            conn.in_savepoint(|conn| {
                conn.execute("INSERT INTO t VALUES (2)", params![])?;
                Ok(TransactionCompletion::Rollback)
            })?;
            Ok(TransactionCompletion::Commit)
        })?;
        Ok(TransactionCompletion::Commit)
    })?;

    let values = conn.query_rows("SELECT a FROM t ORDER BY a", params![])?;
    let values: Vec<i64> = values.iter().map(|row| row.get(0)).collect::<quarry::Result<_>>()?;
    assert_eq!(values, vec![1]);
    Ok(())
}

#[test]
fn savepoint_error_rolls_back_and_propagates() -> Result<()> {
    let mut conn = setup()?;

    let result = conn.in_transaction(None, |conn| {
        conn.execute("INSERT INTO t VALUES (1)", params![])?;
        conn.in_savepoint(|conn| {
            conn.execute("INSERT INTO t VALUES (2)", params![])?;
            Err(Error::Protocol("inner failure".into()))
        })?;
        Ok(TransactionCompletion::Commit)
    });
    assert!(result.is_err());

    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(0));
    Ok(())
}
