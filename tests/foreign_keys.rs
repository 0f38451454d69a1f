use anyhow::Result;
use quarry::{params, Config, Connection, Error};

fn setup_with_orphan() -> Result<Connection> {
    let mut conn = Connection::open_in_memory(Config::new())?;
    conn.execute_batch(
        "CREATE TABLE team(id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE player(id INTEGER PRIMARY KEY, teamId INTEGER REFERENCES team(id))",
    )?;

    // disable enforcement, then sneak an orphan in
    conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    conn.execute("INSERT INTO player(id, teamId) VALUES (1, 99)", params![])?;
    Ok(conn)
}

#[test]
fn check_foreign_keys_throws_the_first_violation() -> Result<()> {
    let mut conn = setup_with_orphan()?;

    let error = conn.check_foreign_keys().unwrap_err();
    match error {
        Error::ForeignKeyViolation(violation) => {
            assert_eq!(violation.origin_table, "player");
            assert_eq!(violation.origin_rowid, Some(1));
            assert_eq!(violation.destination_table, "team");
            assert_eq!(violation.origin_columns, vec!["teamId"]);
            assert_eq!(violation.destination_columns, vec!["id"]);

            let message = violation.to_string();
            assert!(message.contains("player(teamId)"), "message: {message}");
            assert!(message.contains("team(id)"), "message: {message}");
            assert!(message.contains("rowid 1"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn violations_clear_once_the_parent_appears() -> Result<()> {
    let mut conn = setup_with_orphan()?;
    assert_eq!(conn.foreign_key_violations()?.count(), 1);

    conn.execute("INSERT INTO team(id, name) VALUES (99, 'reds')", params![])?;

    assert_eq!(conn.foreign_key_violations()?.count(), 0);
    conn.check_foreign_keys()?;
    Ok(())
}

#[test]
fn the_violation_cursor_enriches_lazily() -> Result<()> {
    let mut conn = setup_with_orphan()?;
    conn.execute("INSERT INTO player(id, teamId) VALUES (2, 98)", params![])?;
    conn.execute("INSERT INTO player(id, teamId) VALUES (3, 97)", params![])?;

    // consuming only the first row leaves the rest untouched
    let mut violations = conn.foreign_key_violations()?;
    let first = violations.next().expect("at least one violation")?;
    assert_eq!(first.origin_table, "player");
    assert_eq!(first.origin_columns, vec!["teamId"]);
    drop(violations);

    assert_eq!(conn.foreign_key_violations()?.count(), 3);
    Ok(())
}

#[test]
fn a_clean_database_reports_no_violations() -> Result<()> {
    let mut conn = Connection::open_in_memory(Config::new())?;
    conn.execute_batch("CREATE TABLE t(a)")?;
    assert_eq!(conn.foreign_key_violations()?.count(), 0);
    conn.check_foreign_keys()?;
    Ok(())
}

#[test]
fn enforcement_follows_the_configuration() -> Result<()> {
    // enforcement on (the default): orphans are rejected outright
    let mut conn = Connection::open_in_memory(Config::new())?;
    conn.execute_batch(
        "CREATE TABLE team(id INTEGER PRIMARY KEY);
         CREATE TABLE player(teamId INTEGER REFERENCES team(id))",
    )?;
    assert!(conn
        .execute("INSERT INTO player(teamId) VALUES (7)", params![])
        .is_err());

    // enforcement off: the insert lands, the check reports it
    let mut conn = Connection::open_in_memory(Config::new().foreign_keys(false))?;
    conn.execute_batch(
        "CREATE TABLE team(id INTEGER PRIMARY KEY);
         CREATE TABLE player(teamId INTEGER REFERENCES team(id))",
    )?;
    conn.execute("INSERT INTO player(teamId) VALUES (7)", params![])?;
    assert_eq!(conn.foreign_key_violations()?.count(), 1);
    Ok(())
}
