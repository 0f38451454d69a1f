use std::collections::{BTreeMap, BTreeSet};
use std::ffi::CString;
use std::ptr::null_mut;
use std::sync::Arc;

use libsqlite3_sys::{
    sqlite3_finalize, sqlite3_libversion_number, sqlite3_prepare_v2, sqlite3_stmt, SQLITE_OK,
};
use once_cell::sync::Lazy;

use crate::connection::transaction::{TransactionCompletion, TransactionKind};
use crate::connection::Connection;
use crate::error::{Error, FkViolation, Result};
use crate::schema::cache::Cached;
use crate::schema::{
    quote_identifier, ColumnInfo, ForeignKeyInfo, IndexInfo, IndexOrigin, PrimaryKeyInfo,
    SchemaId, SchemaInfo, SchemaObject, SchemaObjectKind, TableIdentifier,
};

/// `sqlite3_libversion_number`, probed once per process.
static ENGINE_VERSION: Lazy<i32> = Lazy::new(|| unsafe { sqlite3_libversion_number() });

/// (origin table, origin rowid, destination table, fk id) as reported by
/// `PRAGMA foreign_key_check`, before enrichment.
type RawFkViolation = (String, Option<i64>, String, i64);

/// Cursor over foreign-key violations; see
/// [`Connection::foreign_key_violations`].
pub struct FkViolations<'c> {
    conn: &'c mut Connection,
    raw: std::vec::IntoIter<RawFkViolation>,
}

impl Iterator for FkViolations<'_> {
    type Item = Result<FkViolation>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.raw.next()?;
        Some(self.conn.enrich_fk_violation(raw))
    }
}

/// `PRAGMA table_xinfo` exists from 3.26.0 and exposes hidden and generated
/// columns.
const VERSION_TABLE_XINFO: i32 = 3_026_000;

/// `PRAGMA table_list` exists from 3.37.0 and reports `WITHOUT ROWID`.
const VERSION_TABLE_LIST: i32 = 3_037_000;

impl Connection {
    /// Drops every cached introspection result.
    ///
    /// Prefer letting the version gate do this: the cache already clears
    /// itself whenever `PRAGMA schema_version` no longer matches.
    pub fn clear_schema_cache(&mut self) {
        self.assert_owner();
        self.schema_cache.clear();
    }

    /// Compares the schema-version header against the cached value; on a
    /// mismatch every cache on the connection is cleared. SQLite recompiles
    /// stale statements itself, but only `SQLITE_MAX_SCHEMA_RETRY` times, so
    /// explicit clearing is mandatory.
    pub(crate) fn clear_schema_cache_if_needed(&mut self) -> Result<()> {
        let version = self.schema_version()?;
        if self.last_schema_version != Some(version) {
            self.schema_cache.clear();
            self.statements.clear();
            self.internal_statements.clear();
            self.last_schema_version = Some(version);
        }
        Ok(())
    }

    /// The 32-bit schema version from the database header, incremented by
    /// the engine on every DDL statement, by any connection.
    pub(crate) fn schema_version(&mut self) -> Result<i32> {
        let version: i64 = self
            .query_value_internal("PRAGMA schema_version")?
            .unwrap_or_default();
        Ok(version as i32)
    }

    /// The schemas visible to this connection, temp first so that
    /// unqualified lookups match SQLite's resolution order (temp, main,
    /// attached databases in attach order).
    pub(crate) fn schema_identifiers(&mut self) -> Result<Vec<SchemaId>> {
        if let Some(identifiers) = &self.schema_cache.identifiers {
            return Ok(identifiers.clone());
        }

        let rows = self.query_all_internal("PRAGMA database_list")?;
        let mut identifiers: Vec<SchemaId> = rows
            .iter()
            .map(|row| {
                let name: String = row.get_named("name")?;
                Ok(SchemaId::from_database_name(&name))
            })
            .collect::<Result<_>>()?;

        if let Some(position) = identifiers.iter().position(|id| *id == SchemaId::Temp) {
            let temp = identifiers.remove(position);
            identifiers.insert(0, temp);
        }

        self.schema_cache.identifiers = Some(identifiers.clone());
        Ok(identifiers)
    }

    /// The object catalog of one schema, read from its master table.
    pub(crate) fn schema_info(&mut self, schema: &SchemaId) -> Result<Arc<SchemaInfo>> {
        if let Some(info) = &self.schema_cache.entry(schema).schema_info {
            return Ok(info.clone());
        }

        let sql = format!(
            "SELECT type, name, tbl_name, sql FROM {}.{}",
            schema.quoted(),
            schema.master_table(),
        );
        let rows = self.query_all_internal(&sql)?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.get_named("type")?;
            let Some(kind) = SchemaObjectKind::from_type_str(&kind) else {
                continue;
            };
            objects.push(SchemaObject {
                kind,
                name: row.get_named("name")?,
                tbl_name: row.get_named("tbl_name")?,
                sql: row.get_named("sql")?,
            });
        }

        let info = Arc::new(SchemaInfo::new(objects));
        self.schema_cache.entry(schema).schema_info = Some(info.clone());
        Ok(info)
    }

    /// Resolves `name` to a concrete `(schema, stored-case name)` pair,
    /// trying each `kinds` entry in order within a schema. A named schema
    /// that does not exist is an error; an unresolved name is `Ok(None)`.
    fn resolve_object(
        &mut self,
        kinds: &[SchemaObjectKind],
        name: &str,
        schema: Option<&SchemaId>,
    ) -> Result<Option<TableIdentifier>> {
        let candidates = match schema {
            Some(schema) => {
                if !self.schema_identifiers()?.contains(schema) {
                    return Err(Error::NoSuchSchema(schema.name().to_owned()));
                }
                vec![schema.clone()]
            }
            None => self.schema_identifiers()?,
        };

        for candidate in candidates {
            let info = self.schema_info(&candidate)?;
            for kind in kinds {
                if let Some(object) = info.object_named(*kind, name) {
                    return Ok(Some(TableIdentifier {
                        schema: candidate,
                        name: object.name.clone(),
                    }));
                }
            }
        }

        Ok(None)
    }

    /// Whether a table named `name` exists (case-insensitively) in the given
    /// schema, or in any schema when `schema` is `None`.
    pub fn table_exists(&mut self, name: &str, schema: Option<&SchemaId>) -> Result<bool> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;
        Ok(self
            .resolve_object(&[SchemaObjectKind::Table], name, schema)?
            .is_some())
    }

    pub fn view_exists(&mut self, name: &str, schema: Option<&SchemaId>) -> Result<bool> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;
        Ok(self
            .resolve_object(&[SchemaObjectKind::View], name, schema)?
            .is_some())
    }

    pub fn trigger_exists(&mut self, name: &str, schema: Option<&SchemaId>) -> Result<bool> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;
        Ok(self
            .resolve_object(&[SchemaObjectKind::Trigger], name, schema)?
            .is_some())
    }

    /// The stored casing of a table or view named `name`, or `None`.
    pub fn canonical_table_name(&mut self, name: &str) -> Result<Option<String>> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;
        Ok(self
            .resolve_object(&[SchemaObjectKind::Table, SchemaObjectKind::View], name, None)?
            .map(|table| table.name))
    }

    /// The primary key of `table`.
    ///
    /// Views have no primary key; asking for one fails with
    /// [`Error::NoPrimaryKeyForView`].
    pub fn primary_key(&mut self, table: &str, schema: Option<&SchemaId>) -> Result<PrimaryKeyInfo> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;

        if let Some(table) = self.resolve_object(&[SchemaObjectKind::Table], table, schema)? {
            return self.primary_key_of(&table);
        }
        if self
            .resolve_object(&[SchemaObjectKind::View], table, schema)?
            .is_some()
        {
            return Err(Error::NoPrimaryKeyForView(table.to_owned()));
        }
        Err(Error::NoSuchTable(table.to_owned()))
    }

    /// The columns of `table` (or of a view), in the order `SELECT *` yields
    /// them: hidden columns are filtered out.
    pub fn columns(&mut self, table: &str, schema: Option<&SchemaId>) -> Result<Vec<ColumnInfo>> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;

        let table = self
            .resolve_object(&[SchemaObjectKind::Table, SchemaObjectKind::View], table, schema)?
            .ok_or_else(|| Error::NoSuchTable(table.to_owned()))?;
        Ok(self.columns_of(&table)?.as_ref().clone())
    }

    /// The indexes on `table`. Indexes on expressions are omitted (the
    /// engine reports no column name for them). Known limitation.
    pub fn indexes(&mut self, table: &str, schema: Option<&SchemaId>) -> Result<Vec<IndexInfo>> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;

        let table = self
            .resolve_object(&[SchemaObjectKind::Table], table, schema)?
            .ok_or_else(|| Error::NoSuchTable(table.to_owned()))?;
        Ok(self.indexes_of(&table)?.as_ref().clone())
    }

    /// The foreign keys declared on `table`, with NULL destination columns
    /// filled in from the referenced table's primary key.
    pub fn foreign_keys(
        &mut self,
        table: &str,
        schema: Option<&SchemaId>,
    ) -> Result<Vec<ForeignKeyInfo>> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;

        let table = self
            .resolve_object(&[SchemaObjectKind::Table], table, schema)?
            .ok_or_else(|| Error::NoSuchTable(table.to_owned()))?;
        Ok(self.foreign_keys_of(&table)?.as_ref().clone())
    }

    /// Whether `table` has a rowid (`false` for `WITHOUT ROWID` tables).
    pub fn table_has_rowid(&mut self, table: &str, schema: Option<&SchemaId>) -> Result<bool> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;

        let table = self
            .resolve_object(&[SchemaObjectKind::Table], table, schema)?
            .ok_or_else(|| Error::NoSuchTable(table.to_owned()))?;
        self.has_rowid_of(&table)
    }

    /// Searches `columns` for a subset that uniquely identifies rows of
    /// `table`: the rowid, the primary key, or any unique index. Returns the
    /// key's columns in the table's stored casing, or `None`.
    ///
    /// An empty candidate set returns `None` without touching the database.
    pub fn columns_for_unique_key(
        &mut self,
        columns: &[&str],
        table: &str,
    ) -> Result<Option<Vec<String>>> {
        self.assert_owner();

        if columns.is_empty() {
            return Ok(None);
        }

        self.clear_schema_cache_if_needed()?;
        let table = self
            .resolve_object(&[SchemaObjectKind::Table], table, None)?
            .ok_or_else(|| Error::NoSuchTable(table.to_owned()))?;

        let candidates: BTreeSet<String> =
            columns.iter().map(|c| c.to_lowercase()).collect();
        let is_subset = |key_columns: &[String]| {
            key_columns
                .iter()
                .all(|column| candidates.contains(&column.to_lowercase()))
        };

        if self.has_rowid_of(&table)?
            && candidates.len() == 1
            && candidates.contains("rowid")
        {
            return Ok(Some(vec!["rowid".to_owned()]));
        }

        let primary_key = self.primary_key_of(&table)?;
        let pk_columns = primary_key.columns();
        if is_subset(&pk_columns) {
            return Ok(Some(pk_columns));
        }

        for index in self.indexes_of(&table)?.iter() {
            if index.unique && is_subset(&index.columns) {
                return Ok(Some(index.columns.clone()));
            }
        }

        Ok(None)
    }

    /// The cheapest column set that proves a row exists: the rowid alias,
    /// the bare rowid, or the primary key for `WITHOUT ROWID` tables. For a
    /// view, every column.
    pub fn existence_check_columns(&mut self, table: &str) -> Result<Vec<String>> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;

        if let Some(resolved) = self.resolve_object(&[SchemaObjectKind::Table], table, None)? {
            let primary_key = self.primary_key_of(&resolved)?;
            if let Some(alias) = primary_key.rowid_alias_column() {
                return Ok(vec![alias.to_owned()]);
            }
            if self.has_rowid_of(&resolved)? {
                return Ok(vec!["rowid".to_owned()]);
            }
            return Ok(primary_key.columns());
        }

        if let Some(resolved) = self.resolve_object(&[SchemaObjectKind::View], table, None)? {
            let columns = self.columns_of(&resolved)?;
            return Ok(columns.iter().map(|c| c.name.clone()).collect());
        }

        Err(Error::NoSuchTable(table.to_owned()))
    }

    fn columns_of(&mut self, table: &TableIdentifier) -> Result<Arc<Vec<ColumnInfo>>> {
        let key = table.name.to_lowercase();
        if let Some(cached) = self.schema_cache.entry(&table.schema).columns.get(&key) {
            return match cached {
                Cached::Value(columns) => Ok(columns.clone()),
                Cached::Missing => Err(Error::NoSuchTable(table.name.clone())),
            };
        }

        let extended = *ENGINE_VERSION >= VERSION_TABLE_XINFO;
        let pragma = if extended { "table_xinfo" } else { "table_info" };
        let sql = format!(
            "PRAGMA {}.{pragma}({})",
            table.schema.quoted(),
            quote_identifier(&table.name),
        );

        let rows = self.query_all_internal(&sql)?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let hidden: i64 = if extended { row.get_named("hidden")? } else { 0 };

            // hidden == 1 marks columns that `SELECT *` does not return;
            // generated columns (2, 3) stay
            if hidden == 1 {
                continue;
            }

            columns.push(ColumnInfo {
                cid: row.get_named("cid")?,
                name: row.get_named("name")?,
                decl_type: row.get_named::<Option<String>>("type")?.unwrap_or_default(),
                not_null: row.get_named::<i64>("notnull")? != 0,
                default_sql: row.get_named("dflt_value")?,
                primary_key_ordinal: row.get_named("pk")?,
                hidden,
            });
        }

        let entry = self.schema_cache.entry(&table.schema);
        if columns.is_empty() {
            entry.columns.insert(key, Cached::Missing);
            Err(Error::NoSuchTable(table.name.clone()))
        } else {
            let columns = Arc::new(columns);
            entry.columns.insert(key, Cached::Value(columns.clone()));
            Ok(columns)
        }
    }

    fn primary_key_of(&mut self, table: &TableIdentifier) -> Result<PrimaryKeyInfo> {
        let key = table.name.to_lowercase();
        if let Some(cached) = self.schema_cache.entry(&table.schema).primary_keys.get(&key) {
            return match cached {
                Cached::Value(pk) => Ok(pk.clone()),
                Cached::Missing => Err(Error::NoSuchTable(table.name.clone())),
            };
        }

        let columns = match self.columns_of(table) {
            Ok(columns) => columns,
            Err(error) => {
                if matches!(error, Error::NoSuchTable(_)) {
                    self.schema_cache
                        .entry(&table.schema)
                        .primary_keys
                        .insert(key, Cached::Missing);
                }
                return Err(error);
            }
        };

        let primary_key = PrimaryKeyInfo::classify(&columns[..], || self.has_rowid_of(table))?;
        self.schema_cache
            .entry(&table.schema)
            .primary_keys
            .insert(key, Cached::Value(primary_key.clone()));
        Ok(primary_key)
    }

    fn indexes_of(&mut self, table: &TableIdentifier) -> Result<Arc<Vec<IndexInfo>>> {
        let key = table.name.to_lowercase();
        if let Some(cached) = self.schema_cache.entry(&table.schema).indexes.get(&key) {
            return match cached {
                Cached::Value(indexes) => Ok(indexes.clone()),
                Cached::Missing => Err(Error::NoSuchTable(table.name.clone())),
            };
        }

        let sql = format!(
            "PRAGMA {}.index_list({})",
            table.schema.quoted(),
            quote_identifier(&table.name),
        );
        let index_rows = self.query_all_internal(&sql)?;

        let mut indexes = Vec::with_capacity(index_rows.len());
        'indexes: for row in &index_rows {
            let name: String = row.get_named("name")?;
            let unique: i64 = row.get_named("unique")?;
            let origin: String = row.get_named("origin")?;

            let info_sql = format!(
                "PRAGMA {}.index_info({})",
                table.schema.quoted(),
                quote_identifier(&name),
            );
            let mut column_rows: Vec<(i64, Option<String>)> = self
                .query_all_internal(&info_sql)?
                .iter()
                .map(|row| Ok((row.get_named("seqno")?, row.get_named("name")?)))
                .collect::<Result<_>>()?;
            column_rows.sort_by_key(|(seqno, _)| *seqno);

            let mut columns = Vec::with_capacity(column_rows.len());
            for (_, column) in column_rows {
                match column {
                    // an expression, not a column: skip the whole index
                    None => continue 'indexes,
                    Some(column) => columns.push(column),
                }
            }

            indexes.push(IndexInfo {
                name,
                columns,
                unique: unique != 0,
                origin: IndexOrigin::from_origin_str(&origin),
            });
        }

        let indexes = Arc::new(indexes);
        self.schema_cache
            .entry(&table.schema)
            .indexes
            .insert(key, Cached::Value(indexes.clone()));
        Ok(indexes)
    }

    fn foreign_keys_of(&mut self, table: &TableIdentifier) -> Result<Arc<Vec<ForeignKeyInfo>>> {
        let key = table.name.to_lowercase();
        if let Some(cached) = self.schema_cache.entry(&table.schema).foreign_keys.get(&key) {
            return match cached {
                Cached::Value(fks) => Ok(fks.clone()),
                Cached::Missing => Err(Error::NoSuchTable(table.name.clone())),
            };
        }

        let sql = format!(
            "PRAGMA {}.foreign_key_list({})",
            table.schema.quoted(),
            quote_identifier(&table.name),
        );
        let rows = self.query_all_internal(&sql)?;

        // group rows by foreign-key id, mapping entries ordered by `seq`
        let mut grouped: BTreeMap<i64, (String, Vec<(i64, String, Option<String>)>)> =
            BTreeMap::new();
        for row in &rows {
            let id: i64 = row.get_named("id")?;
            let destination: String = row.get_named("table")?;
            let entry = grouped.entry(id).or_insert_with(|| (destination, Vec::new()));
            entry.1.push((
                row.get_named("seq")?,
                row.get_named("from")?,
                row.get_named("to")?,
            ));
        }

        let mut foreign_keys = Vec::with_capacity(grouped.len());
        for (id, (destination_table, mut entries)) in grouped {
            entries.sort_by_key(|(seq, _, _)| *seq);

            // the engine reports NULL destinations when the constraint
            // references the parent's primary key implicitly
            let destination_columns = if entries.iter().any(|(_, _, to)| to.is_none()) {
                let destination = TableIdentifier {
                    schema: table.schema.clone(),
                    name: destination_table.clone(),
                };
                Some(self.primary_key_of(&destination)?.columns())
            } else {
                None
            };

            let mapping = entries
                .into_iter()
                .enumerate()
                .map(|(position, (_, origin, to))| {
                    let destination = match to {
                        Some(to) => to,
                        None => destination_columns
                            .as_ref()
                            .and_then(|columns| columns.get(position))
                            .cloned()
                            .ok_or_else(|| {
                                Error::Protocol(format!(
                                    "foreign key {id} of {} has no destination column",
                                    table.name
                                ))
                            })?,
                    };
                    Ok((origin, destination))
                })
                .collect::<Result<Vec<_>>>()?;

            foreign_keys.push(ForeignKeyInfo {
                id,
                destination_table,
                mapping,
            });
        }

        let foreign_keys = Arc::new(foreign_keys);
        self.schema_cache
            .entry(&table.schema)
            .foreign_keys
            .insert(key, Cached::Value(foreign_keys.clone()));
        Ok(foreign_keys)
    }

    fn has_rowid_of(&mut self, table: &TableIdentifier) -> Result<bool> {
        let key = table.name.to_lowercase();
        if let Some(has_rowid) = self.schema_cache.entry(&table.schema).has_rowid.get(&key) {
            return Ok(*has_rowid);
        }

        let has_rowid = if *ENGINE_VERSION >= VERSION_TABLE_LIST {
            let sql = format!(
                "PRAGMA {}.table_list({})",
                table.schema.quoted(),
                quote_identifier(&table.name),
            );
            let rows = self.query_all_internal(&sql)?;
            match rows.first() {
                Some(row) => row.get_named::<i64>("wr")? == 0,
                None => self.compiles_rowid_select(table),
            }
        } else {
            self.compiles_rowid_select(table)
        };

        self.schema_cache
            .entry(&table.schema)
            .has_rowid
            .insert(key, has_rowid);
        Ok(has_rowid)
    }

    /// Rowid probe for engines without `PRAGMA table_list`: the statement
    /// compiles iff the table has a rowid. The distinctive alias lets error
    /// log readers discover why the statement was prepared.
    fn compiles_rowid_select(&self, table: &TableIdentifier) -> bool {
        let sql = format!(
            "SELECT rowid AS checkWithoutRowidOptimization FROM {}",
            table.quoted(),
        );
        let Ok(sql) = CString::new(sql) else {
            return false;
        };

        let mut statement: *mut sqlite3_stmt = null_mut();
        let status = unsafe {
            sqlite3_prepare_v2(
                self.handle.as_ptr(),
                sql.as_ptr(),
                -1,
                &mut statement,
                null_mut(),
            )
        };
        unsafe {
            sqlite3_finalize(statement);
        }
        status == SQLITE_OK
    }

    /// A cursor over the rows `PRAGMA foreign_key_check` reports.
    ///
    /// Each violation is enriched with the violated constraint's column
    /// mapping only as the cursor reaches it, so a caller that stops early
    /// pays for no more lookups than it consumed.
    pub fn foreign_key_violations(&mut self) -> Result<FkViolations<'_>> {
        self.assert_owner();
        self.clear_schema_cache_if_needed()?;

        let rows = self.query_all_internal("PRAGMA foreign_key_check")?;
        // copy the raw tuples out: enrichment runs further statements and
        // must not hold cached rows across them
        let raw: Vec<RawFkViolation> = rows
            .iter()
            .map(|row| {
                Ok((
                    row.get_named("table")?,
                    row.get_named("rowid")?,
                    row.get_named("parent")?,
                    row.get_named("fkid")?,
                ))
            })
            .collect::<Result<_>>()?;

        Ok(FkViolations {
            conn: self,
            raw: raw.into_iter(),
        })
    }

    fn enrich_fk_violation(&mut self, raw: RawFkViolation) -> Result<FkViolation> {
        let (origin_table, origin_rowid, destination_table, fk_id) = raw;

        let (origin_columns, destination_columns) = self
            .foreign_keys(&origin_table, None)?
            .into_iter()
            .find(|fk| fk.id == fk_id)
            .map(|fk| fk.mapping.into_iter().unzip())
            .unwrap_or_default();

        Ok(FkViolation {
            origin_table,
            origin_rowid,
            origin_columns,
            destination_table,
            destination_columns,
            fk_id,
        })
    }

    /// Fails with the first foreign-key violation in the database, if any.
    /// Only that first row is enriched; the rest of the cursor is never
    /// touched. Useful after running with `PRAGMA foreign_keys = OFF`.
    pub fn check_foreign_keys(&mut self) -> Result<()> {
        match self.foreign_key_violations()?.next() {
            Some(violation) => Err(Error::ForeignKeyViolation(violation?)),
            None => Ok(()),
        }
    }

    /// Drops every non-internal object in the main schema, inside a
    /// transaction, with foreign-key enforcement temporarily disabled.
    pub fn erase(&mut self) -> Result<()> {
        self.assert_owner();

        let foreign_keys_enabled = self
            .query_value_internal::<i64>("PRAGMA foreign_keys")?
            .unwrap_or_default()
            != 0;
        if foreign_keys_enabled {
            self.execute_internal("PRAGMA foreign_keys = OFF")?;
        }

        let result = self.erase_all_objects();

        if foreign_keys_enabled {
            let restored = self.execute_internal("PRAGMA foreign_keys = ON");
            if result.is_ok() {
                restored?;
            }
        }
        result
    }

    fn erase_all_objects(&mut self) -> Result<()> {
        self.in_transaction(Some(TransactionKind::Immediate), |conn| {
            let rows = conn.query_all_internal(
                "SELECT type, name FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'",
            )?;

            let mut objects: Vec<(String, String)> = rows
                .iter()
                .map(|row| Ok((row.get_named("type")?, row.get_named("name")?)))
                .collect::<Result<_>>()?;

            // triggers and views before tables; dropping a table cascades to
            // its own indexes and triggers, hence IF EXISTS everywhere
            let rank = |kind: &str| match kind {
                "trigger" => 0,
                "view" => 1,
                "table" => 2,
                _ => 3,
            };
            objects.sort_by_key(|(kind, _)| rank(kind));

            for (kind, name) in objects {
                let statement = match kind.as_str() {
                    "table" => "DROP TABLE IF EXISTS",
                    "view" => "DROP VIEW IF EXISTS",
                    "trigger" => "DROP TRIGGER IF EXISTS",
                    "index" => "DROP INDEX IF EXISTS",
                    _ => continue,
                };
                conn.execute_internal(&format!("{statement} {}", quote_identifier(&name)))?;
            }

            Ok(TransactionCompletion::Commit)
        })?;

        self.clear_schema_cache();
        Ok(())
    }
}
