use anyhow::Result;
use quarry::{params, Config, Connection, Error, TransactionKind};

fn wal_connection() -> Result<(tempfile::TempDir, Connection)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("suspend.db");
    let mut conn = Connection::open(&path, Config::new())?;
    conn.execute_batch("PRAGMA journal_mode = wal")?;
    conn.execute_batch("CREATE TABLE t(a INTEGER)")?;
    conn.execute("INSERT INTO t VALUES (1)", params![])?;
    Ok((dir, conn))
}

#[test]
fn suspended_wal_connections_still_read() -> Result<()> {
    let (_dir, mut conn) = wal_connection()?;

    conn.suspend();

    let value: Option<i64> = conn.query_value("SELECT a FROM t", params![])?;
    assert_eq!(value, Some(1));

    let result = conn.execute("INSERT INTO t VALUES (2)", params![]);
    assert!(matches!(result, Err(Error::Suspended)));

    conn.resume();

    conn.execute("INSERT INTO t VALUES (2)", params![])?;
    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(2));
    Ok(())
}

#[test]
fn suspended_rollback_journal_connections_reject_even_reads() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("journal.db");
    let mut conn = Connection::open(&path, Config::new())?;
    conn.execute_batch("CREATE TABLE t(a)")?;

    conn.suspend();
    let result = conn.query_value::<i64>("SELECT COUNT(*) FROM t", params![]);
    assert!(matches!(result, Err(Error::Suspended)));

    conn.resume();
    assert!(conn.query_value::<i64>("SELECT COUNT(*) FROM t", params![]).is_ok());
    Ok(())
}

#[test]
fn lock_releasing_statements_always_run() -> Result<()> {
    let (_dir, mut conn) = wal_connection()?;

    conn.begin_transaction(Some(TransactionKind::Immediate))?;
    conn.execute("INSERT INTO t VALUES (2)", params![])?;

    conn.suspend();

    // COMMIT releases the write lock: the gate lets it through even while
    // suspended
    conn.commit()?;
    conn.resume();

    let count: Option<i64> = conn.query_value("SELECT COUNT(*) FROM t", params![])?;
    assert_eq!(count, Some(2));
    Ok(())
}

#[test]
fn suspension_is_idempotent() -> Result<()> {
    let (_dir, mut conn) = wal_connection()?;

    conn.suspend();
    conn.suspend();
    assert!(matches!(
        conn.execute("INSERT INTO t VALUES (9)", params![]),
        Err(Error::Suspended)
    ));

    conn.resume();
    conn.resume();
    conn.execute("INSERT INTO t VALUES (9)", params![])?;
    Ok(())
}

#[test]
fn suspension_handles_work_after_cloning() -> Result<()> {
    let (_dir, mut conn) = wal_connection()?;

    let handle = conn.suspension_handle();
    let clone = handle.clone();

    clone.suspend();
    assert!(matches!(
        conn.execute("INSERT INTO t VALUES (3)", params![]),
        Err(Error::Suspended)
    ));

    handle.resume();
    conn.execute("INSERT INTO t VALUES (3)", params![])?;

    // outliving the connection is fine
    drop(conn);
    clone.suspend();
    clone.resume();
    Ok(())
}

#[test]
fn suspension_observation_flag_is_reported() -> Result<()> {
    let conn = Connection::open_in_memory(
        Config::new().observes_suspension_notifications(true),
    )?;
    assert!(conn.observes_suspension_notifications());
    Ok(())
}
