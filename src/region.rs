use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

/// The set of tables a group of statements reads from.
///
/// Recorded by the connection's authorizer while statements compile, and
/// unioned into a caller-provided accumulator by
/// [`Connection::recording_selection`](crate::Connection::recording_selection).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseRegion {
    full: bool,
    tables: BTreeSet<String>,
}

impl DatabaseRegion {
    /// The region covering the whole database. Recording into a full region
    /// is skipped: nothing can extend it.
    pub fn full_database() -> Self {
        Self {
            full: true,
            tables: BTreeSet::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.tables.is_empty()
    }

    /// Table names in the region; empty for the full-database region.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.full || self.tables.iter().any(|t| t.eq_ignore_ascii_case(name))
    }

    pub(crate) fn insert_table(&mut self, name: &str) {
        if !self.full {
            self.tables.insert(name.to_owned());
        }
    }

    pub fn union(&mut self, other: &DatabaseRegion) {
        if other.full {
            self.full = true;
            self.tables.clear();
        } else if !self.full {
            self.tables.extend(other.tables.iter().cloned());
        }
    }
}

impl Display for DatabaseRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.full {
            return f.write_str("full database");
        }
        let mut first = true;
        for table in &self.tables {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(table)?;
            first = false;
        }
        Ok(())
    }
}
