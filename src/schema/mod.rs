use std::fmt::{self, Display, Formatter};

use crate::error::Result;

pub(crate) mod cache;
mod introspect;

pub use introspect::FkViolations;

/// One of the schemas visible to a connection.
///
/// `main` and `temp` always exist; every `ATTACH` adds another. Unqualified
/// table names resolve in SQLite's order: temp first, then main, then the
/// attached schemas in attach order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaId {
    Main,
    Temp,
    Attached(String),
}

impl SchemaId {
    pub(crate) fn from_database_name(name: &str) -> SchemaId {
        match name {
            "main" => SchemaId::Main,
            "temp" => SchemaId::Temp,
            other => SchemaId::Attached(other.to_owned()),
        }
    }

    /// The bare schema name as it appears in qualified SQL.
    pub fn name(&self) -> &str {
        match self {
            SchemaId::Main => "main",
            SchemaId::Temp => "temp",
            SchemaId::Attached(name) => name,
        }
    }

    /// The master table holding this schema's object catalog.
    pub(crate) fn master_table(&self) -> &'static str {
        match self {
            SchemaId::Temp => "sqlite_temp_master",
            SchemaId::Main | SchemaId::Attached(_) => "sqlite_master",
        }
    }

    pub(crate) fn quoted(&self) -> String {
        quote_identifier(self.name())
    }
}

impl Display for SchemaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Renders `name` as a double-quoted SQL identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A table resolved to a concrete schema, with its stored casing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentifier {
    pub schema: SchemaId,
    pub name: String,
}

impl TableIdentifier {
    /// A `"schema"."name"` rendering safe for splicing into SQL.
    pub fn quoted(&self) -> String {
        format!("{}.{}", self.schema.quoted(), quote_identifier(&self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaObjectKind {
    Table,
    View,
    Index,
    Trigger,
}

impl SchemaObjectKind {
    pub(crate) fn from_type_str(value: &str) -> Option<SchemaObjectKind> {
        match value {
            "table" => Some(SchemaObjectKind::Table),
            "view" => Some(SchemaObjectKind::View),
            "index" => Some(SchemaObjectKind::Index),
            "trigger" => Some(SchemaObjectKind::Trigger),
            _ => None,
        }
    }
}

/// One row of a schema's master table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: SchemaObjectKind,
    pub name: String,
    pub tbl_name: Option<String>,
    pub sql: Option<String>,
}

/// The full object catalog of one schema.
///
/// Names are stored case-preserved and compared case-insensitively, matching
/// SQLite's identifier rules.
#[derive(Debug, Clone, Default)]
pub struct SchemaInfo {
    objects: Vec<SchemaObject>,
}

impl SchemaInfo {
    pub(crate) fn new(objects: Vec<SchemaObject>) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &[SchemaObject] {
        &self.objects
    }

    pub fn object_named(&self, kind: SchemaObjectKind, name: &str) -> Option<&SchemaObject> {
        self.objects
            .iter()
            .find(|object| object.kind == kind && object.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, kind: SchemaObjectKind, name: &str) -> bool {
        self.object_named(kind, name).is_some()
    }

    /// The stored casing of `name`, looked up case-insensitively.
    pub fn canonical_name(&self, kind: SchemaObjectKind, name: &str) -> Option<&str> {
        self.object_named(kind, name).map(|object| object.name.as_str())
    }
}

/// One row of `PRAGMA table_xinfo` (or `table_info` on older engines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    /// The declared type; empty when the column was declared without one.
    pub decl_type: String,
    pub not_null: bool,
    pub default_sql: Option<String>,
    /// 1-based position inside the primary key, 0 when not part of it.
    pub primary_key_ordinal: i64,
    /// Raw `hidden` value from `table_xinfo`: 0 plain, 1 hidden,
    /// 2 virtual generated, 3 stored generated.
    pub hidden: i64,
}

/// How a table's rows are uniquely addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKeyInfo {
    /// No explicit primary key: rows are addressed by the implicit rowid.
    HiddenRowid,
    /// A single `INTEGER` column aliasing the rowid.
    Rowid(String),
    /// Any other explicit primary key.
    Regular {
        columns: Vec<String>,
        has_rowid: bool,
    },
}

impl PrimaryKeyInfo {
    /// Classifies the primary key from the table's column list. `has_rowid`
    /// is only consulted for the `Regular` case, so callers can keep the
    /// rowid probe lazy.
    pub(crate) fn classify(
        columns: &[ColumnInfo],
        has_rowid: impl FnOnce() -> Result<bool>,
    ) -> Result<PrimaryKeyInfo> {
        let mut pk_columns: Vec<&ColumnInfo> = columns
            .iter()
            .filter(|column| column.primary_key_ordinal > 0)
            .collect();
        pk_columns.sort_by_key(|column| column.primary_key_ordinal);

        match pk_columns.as_slice() {
            [] => Ok(PrimaryKeyInfo::HiddenRowid),
            // An `INTEGER PRIMARY KEY DESC` column is *not* a rowid alias,
            // but the declared type alone cannot tell it apart; detecting it
            // would require parsing the original CREATE TABLE statement.
            // Known deviation.
            [column] if column.decl_type.eq_ignore_ascii_case("INTEGER") => {
                Ok(PrimaryKeyInfo::Rowid(column.name.clone()))
            }
            columns => Ok(PrimaryKeyInfo::Regular {
                columns: columns.iter().map(|c| c.name.clone()).collect(),
                has_rowid: has_rowid()?,
            }),
        }
    }

    /// The primary key columns; `["rowid"]` for [`HiddenRowid`](Self::HiddenRowid).
    pub fn columns(&self) -> Vec<String> {
        match self {
            PrimaryKeyInfo::HiddenRowid => vec!["rowid".to_owned()],
            PrimaryKeyInfo::Rowid(column) => vec![column.clone()],
            PrimaryKeyInfo::Regular { columns, .. } => columns.clone(),
        }
    }

    /// Whether the key is the rowid itself, hidden or aliased.
    pub fn is_rowid(&self) -> bool {
        matches!(self, PrimaryKeyInfo::HiddenRowid | PrimaryKeyInfo::Rowid(_))
    }

    /// The user column aliasing the rowid, if the table declares one.
    pub fn rowid_alias_column(&self) -> Option<&str> {
        match self {
            PrimaryKeyInfo::Rowid(column) => Some(column),
            _ => None,
        }
    }

    /// Whether the table backing this key has a rowid at all.
    pub fn has_rowid(&self) -> bool {
        match self {
            PrimaryKeyInfo::HiddenRowid | PrimaryKeyInfo::Rowid(_) => true,
            PrimaryKeyInfo::Regular { has_rowid, .. } => *has_rowid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Created by a `CREATE INDEX` statement.
    CreateIndex,
    /// Implements a `UNIQUE` constraint.
    UniqueConstraint,
    /// Implements a `PRIMARY KEY` constraint.
    PrimaryKeyConstraint,
}

impl IndexOrigin {
    pub(crate) fn from_origin_str(value: &str) -> IndexOrigin {
        match value {
            "u" => IndexOrigin::UniqueConstraint,
            "pk" => IndexOrigin::PrimaryKeyConstraint,
            _ => IndexOrigin::CreateIndex,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    /// Indexed columns, in index order. Indexes on expressions are omitted
    /// from introspection results entirely.
    pub columns: Vec<String>,
    pub unique: bool,
    pub origin: IndexOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub id: i64,
    pub destination_table: String,
    /// `(origin, destination)` column pairs, ordered by the constraint's
    /// column sequence. Destinations the engine reports as NULL are filled
    /// from the referenced table's primary key.
    pub mapping: Vec<(String, String)>,
}
