use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, SqliteValue};

/// A single result row, detached from the statement that produced it.
///
/// Column names are shared between every row of one statement.
#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) values: Vec<SqliteValue>,
    pub(crate) columns: Arc<Vec<String>>,
    pub(crate) column_indices: Arc<HashMap<String, usize>>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// The raw value at `index`, or `None` when out of bounds.
    pub fn value(&self, index: usize) -> Option<&SqliteValue> {
        self.values.get(index)
    }

    /// Decodes the value at `index` as `T`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| Error::Decode(format!("column index {index} out of bounds")))?;
        T::from_value(value)
    }

    /// Decodes the value in the column called `name` as `T`.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self
            .column_indices
            .get(name)
            .copied()
            .ok_or_else(|| Error::Decode(format!("no column named {name}")))?;
        self.get(index)
    }
}
