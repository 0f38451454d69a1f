use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::{ColumnInfo, ForeignKeyInfo, IndexInfo, PrimaryKeyInfo, SchemaId, SchemaInfo};

/// A cached introspection result.
///
/// `Missing` is cached too: repeated lookups of a nonexistent table must not
/// hit the database again until the schema version changes.
#[derive(Debug, Clone)]
pub(crate) enum Cached<T> {
    Missing,
    Value(T),
}

/// Per-schema introspection cache, keyed by lowercased table name.
#[derive(Debug, Default)]
pub(crate) struct SchemaEntryCache {
    pub(crate) schema_info: Option<Arc<SchemaInfo>>,
    pub(crate) columns: HashMap<String, Cached<Arc<Vec<ColumnInfo>>>>,
    pub(crate) primary_keys: HashMap<String, Cached<PrimaryKeyInfo>>,
    pub(crate) indexes: HashMap<String, Cached<Arc<Vec<IndexInfo>>>>,
    pub(crate) foreign_keys: HashMap<String, Cached<Arc<Vec<ForeignKeyInfo>>>>,
    pub(crate) has_rowid: HashMap<String, bool>,
}

/// The connection's schema cache, spanning every attached schema.
///
/// Gated by `PRAGMA schema_version`: the connection clears it whenever the
/// stored version no longer matches the database header.
#[derive(Debug, Default)]
pub(crate) struct SchemaCache {
    /// Resolved schema identifiers, temp reordered to the front so that
    /// unqualified lookups match SQLite's resolution order.
    pub(crate) identifiers: Option<Vec<SchemaId>>,
    entries: HashMap<SchemaId, SchemaEntryCache>,
}

impl SchemaCache {
    pub(crate) fn entry(&mut self, schema: &SchemaId) -> &mut SchemaEntryCache {
        self.entries.entry(schema.clone()).or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.identifiers = None;
        self.entries.clear();
    }
}
