use anyhow::Result;
use quarry::{
    params, Config, Connection, Error, IndexOrigin, PrimaryKeyInfo, SchemaId,
};

fn setup() -> Result<Connection> {
    Ok(Connection::open_in_memory(Config::new())?)
}

#[test]
fn canonical_table_name_preserves_stored_casing() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE FooBar(x)")?;

    assert_eq!(conn.canonical_table_name("foobar")?.as_deref(), Some("FooBar"));
    assert_eq!(conn.canonical_table_name("FOOBAR")?.as_deref(), Some("FooBar"));
    assert_eq!(conn.canonical_table_name("nope")?, None);

    assert!(conn.table_exists("fooBAR", None)?);
    assert!(!conn.table_exists("nope", None)?);
    Ok(())
}

#[test]
fn integer_primary_key_classifies_as_rowid_alias() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)")?;

    let pk = conn.primary_key("t", None)?;
    assert_eq!(pk, PrimaryKeyInfo::Rowid("id".to_owned()));
    assert!(pk.is_rowid());
    assert_eq!(pk.rowid_alias_column(), Some("id"));
    assert!(pk.has_rowid());
    Ok(())
}

#[test]
fn int_primary_key_stays_a_regular_key() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(id INT PRIMARY KEY, name TEXT)")?;

    let pk = conn.primary_key("t", None)?;
    assert_eq!(
        pk,
        PrimaryKeyInfo::Regular {
            columns: vec!["id".to_owned()],
            has_rowid: true,
        }
    );
    assert_eq!(pk.rowid_alias_column(), None);
    Ok(())
}

#[test]
fn tables_without_explicit_pk_report_the_hidden_rowid() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(a, b)")?;

    let pk = conn.primary_key("t", None)?;
    assert_eq!(pk, PrimaryKeyInfo::HiddenRowid);
    assert_eq!(pk.columns(), vec!["rowid"]);
    Ok(())
}

#[test]
fn without_rowid_multi_column_pk() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(a, b, c, PRIMARY KEY(b, a)) WITHOUT ROWID")?;

    let pk = conn.primary_key("t", None)?;
    assert_eq!(
        pk,
        PrimaryKeyInfo::Regular {
            columns: vec!["b".to_owned(), "a".to_owned()],
            has_rowid: false,
        }
    );
    assert!(!pk.is_rowid());
    assert!(!pk.has_rowid());
    assert_eq!(pk.rowid_alias_column(), None);

    assert!(!conn.table_has_rowid("t", None)?);
    Ok(())
}

#[test]
fn primary_key_of_a_view_is_refused() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(a); CREATE VIEW v AS SELECT a FROM t")?;

    assert!(matches!(
        conn.primary_key("v", None),
        Err(Error::NoPrimaryKeyForView(name)) if name == "v"
    ));
    assert!(matches!(
        conn.primary_key("missing", None),
        Err(Error::NoSuchTable(name)) if name == "missing"
    ));
    Ok(())
}

#[test]
fn named_schemas_must_exist() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(a)")?;

    let ghost = SchemaId::Attached("ghost".to_owned());
    assert!(matches!(
        conn.table_exists("t", Some(&ghost)),
        Err(Error::NoSuchSchema(name)) if name == "ghost"
    ));
    assert!(conn.table_exists("t", Some(&SchemaId::Main))?);
    Ok(())
}

#[test]
fn columns_report_declarations_and_match_select_star() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT 'anon',
            score
        )",
    )?;

    let columns = conn.columns("t", None)?;
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "score"]);

    assert_eq!(columns[0].decl_type, "INTEGER");
    assert_eq!(columns[0].primary_key_ordinal, 1);
    assert!(columns[1].not_null);
    assert_eq!(columns[1].default_sql.as_deref(), Some("'anon'"));
    assert_eq!(columns[2].decl_type, "");
    assert!(!columns[2].not_null);
    Ok(())
}

#[test]
fn columns_of_views_and_existence_invariants() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(a INTEGER, b TEXT, PRIMARY KEY(a));
         CREATE VIEW v AS SELECT a AS x, b AS y FROM t",
    )?;

    let view_columns = conn.columns("v", None)?;
    let names: Vec<&str> = view_columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);

    // if a table exists, its primary key columns appear among its columns
    for table in ["t"] {
        assert!(conn.table_exists(table, None)?);
        let pk = conn.primary_key(table, None)?;
        let columns = conn.columns(table, None)?;
        assert!(!columns.is_empty());
        for pk_column in pk.columns() {
            assert!(columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&pk_column)));
        }
    }
    Ok(())
}

#[test]
fn generated_columns_survive_filtering() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(a INTEGER, doubled INTEGER GENERATED ALWAYS AS (a * 2) VIRTUAL)",
    )?;

    let columns = conn.columns("t", None)?;
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "doubled"]);
    Ok(())
}

#[test]
fn indexes_report_origin_and_uniqueness() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(a TEXT UNIQUE, b TEXT, c TEXT);
         CREATE INDEX t_on_b ON t(b);
         CREATE UNIQUE INDEX t_on_b_c ON t(b, c)",
    )?;

    let indexes = conn.indexes("t", None)?;

    let by_name = |name: &str| {
        indexes
            .iter()
            .find(|index| index.name == name)
            .unwrap_or_else(|| panic!("missing index {name}"))
    };

    let on_b = by_name("t_on_b");
    assert_eq!(on_b.columns, vec!["b"]);
    assert!(!on_b.unique);
    assert_eq!(on_b.origin, IndexOrigin::CreateIndex);

    let on_b_c = by_name("t_on_b_c");
    assert_eq!(on_b_c.columns, vec!["b", "c"]);
    assert!(on_b_c.unique);

    // the UNIQUE column constraint materializes as an index too
    assert!(indexes
        .iter()
        .any(|index| index.unique && index.origin == IndexOrigin::UniqueConstraint));
    Ok(())
}

#[test]
fn expression_indexes_are_omitted() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(a TEXT);
         CREATE INDEX t_expr ON t(lower(a))",
    )?;

    let indexes = conn.indexes("t", None)?;
    assert!(indexes.iter().all(|index| index.name != "t_expr"));
    Ok(())
}

#[test]
fn foreign_keys_fill_implicit_destinations_from_the_pk() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE team(id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE player(
            name TEXT,
            teamId INTEGER REFERENCES team(id),
            clubId INTEGER REFERENCES team
         )",
    )?;

    let fks = conn.foreign_keys("player", None)?;
    assert_eq!(fks.len(), 2);

    for fk in &fks {
        assert_eq!(fk.destination_table, "team");
    }

    // explicit and implicit destinations agree after the fill
    let mappings: Vec<&(String, String)> =
        fks.iter().flat_map(|fk| fk.mapping.iter()).collect();
    assert!(mappings.contains(&&("teamId".to_owned(), "id".to_owned())));
    assert!(mappings.contains(&&("clubId".to_owned(), "id".to_owned())));
    Ok(())
}

#[test]
fn columns_for_unique_key_checks_rowid_pk_then_indexes() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(id INTEGER PRIMARY KEY, email TEXT UNIQUE, name TEXT)",
    )?;

    // empty candidate set: answered without touching the database
    assert_eq!(conn.columns_for_unique_key(&[], "t")?, None);

    // the bare rowid, case-insensitively
    assert_eq!(
        conn.columns_for_unique_key(&["RowID"], "t")?,
        Some(vec!["rowid".to_owned()])
    );

    // the primary key
    assert_eq!(
        conn.columns_for_unique_key(&["id", "name"], "t")?,
        Some(vec!["id".to_owned()])
    );

    // a unique index
    assert_eq!(
        conn.columns_for_unique_key(&["EMAIL", "name"], "t")?,
        Some(vec!["email".to_owned()])
    );

    // no unique key in the set
    assert_eq!(conn.columns_for_unique_key(&["name"], "t")?, None);
    Ok(())
}

#[test]
fn existence_check_columns_pick_the_cheapest_key() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE aliased(id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE bare(a, b);
         CREATE TABLE keyed(a TEXT, b TEXT, PRIMARY KEY(a, b)) WITHOUT ROWID;
         CREATE VIEW v AS SELECT a, b FROM bare",
    )?;

    assert_eq!(conn.existence_check_columns("aliased")?, vec!["id"]);
    assert_eq!(conn.existence_check_columns("bare")?, vec!["rowid"]);
    assert_eq!(conn.existence_check_columns("keyed")?, vec!["a", "b"]);
    assert_eq!(conn.existence_check_columns("v")?, vec!["a", "b"]);
    Ok(())
}

#[test]
fn introspection_is_idempotent_across_cache_clears() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT UNIQUE);
         CREATE INDEX t_name ON t(name)",
    )?;

    let pk_before = conn.primary_key("t", None)?;
    let columns_before = conn.columns("t", None)?;
    let indexes_before = conn.indexes("t", None)?;

    conn.clear_schema_cache();

    assert_eq!(conn.primary_key("t", None)?, pk_before);
    assert_eq!(conn.columns("t", None)?, columns_before);
    assert_eq!(conn.indexes("t", None)?, indexes_before);
    Ok(())
}

#[test]
fn missing_tables_are_cached_without_repeat_lookups() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch("CREATE TABLE t(a)")?;

    for _ in 0..3 {
        assert!(matches!(
            conn.primary_key("ghost", None),
            Err(Error::NoSuchTable(_))
        ));
    }
    Ok(())
}

#[test]
fn schema_version_gate_sees_cross_connection_ddl() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shared.db");

    let mut writer = Connection::open(&path, Config::new())?;
    writer.execute_batch("CREATE TABLE t(a)")?;

    let mut reader = Connection::open(&path, Config::new())?;
    assert_eq!(reader.columns("t", None)?.len(), 1);

    writer.execute_batch("ALTER TABLE t ADD COLUMN b")?;

    // the version gate invalidates the reader's cache
    assert_eq!(reader.columns("t", None)?.len(), 2);
    Ok(())
}

#[test]
fn temp_tables_shadow_main_tables() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(main_column INTEGER);
         CREATE TEMP TABLE t(temp_column INTEGER)",
    )?;

    // unqualified resolution prefers temp, like SQLite itself
    let columns = conn.columns("t", None)?;
    assert_eq!(columns[0].name, "temp_column");

    let main_columns = conn.columns("t", Some(&SchemaId::Main))?;
    assert_eq!(main_columns[0].name, "main_column");

    assert!(conn.table_exists("t", Some(&SchemaId::Temp))?);
    Ok(())
}

#[test]
fn attached_databases_are_separate_schemas() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let aux_path = dir.path().join("aux.db");

    let mut conn = Connection::open_in_memory(Config::new())?;
    conn.execute_batch(&format!(
        "ATTACH DATABASE '{}' AS aux",
        aux_path.display()
    ))?;
    conn.execute_batch("CREATE TABLE aux.widget(id INTEGER PRIMARY KEY)")?;

    let aux = SchemaId::Attached("aux".to_owned());
    assert!(conn.table_exists("widget", Some(&aux))?);
    assert!(conn.table_exists("widget", None)?);
    assert!(!conn.table_exists("widget", Some(&SchemaId::Main))?);

    let pk = conn.primary_key("widget", Some(&aux))?;
    assert_eq!(pk, PrimaryKeyInfo::Rowid("id".to_owned()));
    Ok(())
}

#[test]
fn views_and_triggers_are_introspectable() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE t(a);
         CREATE VIEW v AS SELECT a FROM t;
         CREATE TRIGGER trig AFTER INSERT ON t BEGIN SELECT 1; END",
    )?;

    assert!(conn.view_exists("V", None)?);
    assert!(!conn.view_exists("t", None)?);
    assert!(conn.trigger_exists("TRIG", None)?);
    assert!(!conn.trigger_exists("v", None)?);
    Ok(())
}

#[test]
fn erase_drops_every_non_internal_object() -> Result<()> {
    let mut conn = setup()?;
    conn.execute_batch(
        "CREATE TABLE team(id INTEGER PRIMARY KEY);
         CREATE TABLE player(id INTEGER PRIMARY KEY, teamId REFERENCES team(id));
         CREATE INDEX player_team ON player(teamId);
         CREATE VIEW v AS SELECT * FROM player;
         CREATE TRIGGER trig AFTER INSERT ON team BEGIN SELECT 1; END",
    )?;
    conn.execute("INSERT INTO team(id) VALUES (1)", params![])?;

    conn.erase()?;

    assert!(!conn.table_exists("team", None)?);
    assert!(!conn.table_exists("player", None)?);
    assert!(!conn.view_exists("v", None)?);
    assert!(!conn.trigger_exists("trig", None)?);

    let remaining: Option<i64> = conn.query_value(
        "SELECT COUNT(*) FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'",
        params![],
    )?;
    assert_eq!(remaining, Some(0));

    // the database is usable again afterwards
    conn.execute_batch("CREATE TABLE fresh(a)")?;
    assert!(conn.table_exists("fresh", None)?);
    Ok(())
}
