use anyhow::Result;
use quarry::{
    params, Aggregate, AggregateFunction, Config, Connection, Error, Function, SqliteValue,
};

fn setup() -> Result<Connection> {
    Ok(Connection::open_in_memory(Config::new())?)
}

#[test]
fn scalar_functions_run_and_remove() -> Result<()> {
    let mut conn = setup()?;

    conn.add_function(Function::new("double", Some(1), |args| match args[0] {
        SqliteValue::Integer(i) => Ok(SqliteValue::Integer(i * 2)),
        _ => Ok(SqliteValue::Null),
    }))?;

    let value: Option<i64> = conn.query_value("SELECT double(21)", params![])?;
    assert_eq!(value, Some(42));

    conn.remove_function("double", Some(1))?;

    // back to "no such function" for fresh statements
    let result = conn.query_value::<i64>("SELECT double(2)", params![]);
    match result {
        Err(Error::Sqlite(e)) => assert!(e.message().contains("no such function")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn variadic_functions_accept_any_arity() -> Result<()> {
    let mut conn = setup()?;

    conn.add_function(Function::new("count_args", None, |args| {
        Ok(SqliteValue::Integer(args.len() as i64))
    }))?;

    assert_eq!(
        conn.query_value::<i64>("SELECT count_args()", params![])?,
        Some(0)
    );
    assert_eq!(
        conn.query_value::<i64>("SELECT count_args(1, 'two', 3.0)", params![])?,
        Some(3)
    );
    Ok(())
}

#[test]
fn function_errors_surface_as_engine_errors() -> Result<()> {
    let mut conn = setup()?;

    conn.add_function(Function::new("explode", Some(0), |_args| {
        Err(Error::Protocol("told to explode".into()))
    }))?;

    let result = conn.query_value::<i64>("SELECT explode()", params![]);
    match result {
        Err(Error::Sqlite(e)) => assert!(e.message().contains("told to explode")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn default_case_transforms_are_registered() -> Result<()> {
    let mut conn = setup()?;

    assert_eq!(
        conn.query_value::<String>("SELECT uppercase('straße')", params![])?,
        Some("STRASSE".to_owned())
    );
    assert_eq!(
        conn.query_value::<String>("SELECT lowercase('HÉLLO')", params![])?,
        Some("héllo".to_owned())
    );
    assert_eq!(
        conn.query_value::<String>("SELECT capitalize('hello world')", params![])?,
        Some("Hello World".to_owned())
    );

    // non-text input yields NULL
    assert_eq!(
        conn.query_value::<Option<i64>>("SELECT uppercase(12)", params![])?,
        Some(None)
    );
    Ok(())
}

struct Product {
    acc: i64,
}

impl Aggregate for Product {
    fn step(&mut self, args: &[SqliteValue]) -> quarry::Result<()> {
        match args[0] {
            SqliteValue::Integer(i) if i >= 0 => {
                self.acc *= i;
                Ok(())
            }
            SqliteValue::Integer(_) => Err(Error::Protocol("negative factor".into())),
            _ => Ok(()),
        }
    }

    fn finish(&mut self) -> quarry::Result<SqliteValue> {
        Ok(SqliteValue::Integer(self.acc))
    }
}

#[test]
fn aggregates_accumulate_per_invocation() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(a INTEGER); INSERT INTO t VALUES (2), (3), (7)")?;

    conn.add_aggregate(AggregateFunction::new("product", Some(1), || {
        Box::new(Product { acc: 1 })
    }))?;

    assert_eq!(
        conn.query_value::<i64>("SELECT product(a) FROM t", params![])?,
        Some(42)
    );

    // over zero rows, the finalizer runs on a fresh state
    assert_eq!(
        conn.query_value::<i64>("SELECT product(a) FROM t WHERE a > 100", params![])?,
        Some(1)
    );

    // grouped: one state per group
    let rows = conn.query_rows(
        "SELECT a % 2 AS grp, product(a) FROM t GROUP BY a % 2 ORDER BY grp",
        params![],
    )?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<i64>(1)?, 2);
    assert_eq!(rows[1].get::<i64>(1)?, 21);
    Ok(())
}

#[test]
fn aggregate_step_errors_reach_the_finalizer() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(a INTEGER); INSERT INTO t VALUES (2), (-1), (3)")?;

    conn.add_aggregate(AggregateFunction::new("product", Some(1), || {
        Box::new(Product { acc: 1 })
    }))?;

    let result = conn.query_value::<i64>("SELECT product(a) FROM t", params![]);
    match result {
        Err(Error::Sqlite(e)) => assert!(e.message().contains("negative factor")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn aggregates_share_removal_with_scalars() -> Result<()> {
    let mut conn = setup()?;

    conn.add_aggregate(AggregateFunction::new("product", Some(1), || {
        Box::new(Product { acc: 1 })
    }))?;
    conn.remove_function("product", Some(1))?;

    assert!(conn.query_value::<i64>("SELECT product(1)", params![]).is_err());
    Ok(())
}

#[test]
fn the_default_unicode_ci_collation_is_available() -> Result<()> {
    let mut conn = setup()?;

    let equal: Option<i64> =
        conn.query_value("SELECT 'Élan' = 'éLAN' COLLATE UNICODE_CI", params![])?;
    assert_eq!(equal, Some(1));
    Ok(())
}

#[test]
fn custom_collations_order_and_remove() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(name TEXT);
         INSERT INTO t VALUES ('ab'), ('ba'), ('ca')",
    )?;

    // order by the *reversed* string
    conn.add_collation("backwards", |left: &str, right: &str| {
        let l: String = left.chars().rev().collect();
        let r: String = right.chars().rev().collect();
        l.cmp(&r)
    })?;

    let rows = conn.query_rows("SELECT name FROM t ORDER BY name COLLATE backwards", params![])?;
    let names: Vec<String> = rows
        .iter()
        .map(|row| row.get(0))
        .collect::<quarry::Result<_>>()?;
    // sorted by the reversed strings: "ab" < "ac" < "ba"
    assert_eq!(names, vec!["ba", "ca", "ab"]);

    conn.remove_collation("backwards")?;
    let result = conn.query_rows(
        "SELECT name FROM t ORDER BY name COLLATE backwards LIMIT 1",
        params![],
    );
    match result {
        Err(Error::Sqlite(e)) => assert!(e.message().contains("no such collation")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn collation_closures_can_ignore_case() -> Result<()> {
    let mut conn = setup()?;
    conn.add_collation("fold", |left: &str, right: &str| {
        left.to_lowercase().cmp(&right.to_lowercase())
    })?;

    let equal: Option<i64> =
        conn.query_value("SELECT 'HELLO' = 'hello' COLLATE fold", params![])?;
    assert_eq!(equal, Some(1));
    Ok(())
}
