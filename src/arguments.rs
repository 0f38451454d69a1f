use crate::error::{Error, Result};
use crate::statement::handle::StatementHandle;
use crate::value::SqliteValue;

/// Positional arguments for a prepared statement.
#[derive(Debug, Clone, Default)]
pub struct Arguments(pub(crate) Vec<SqliteValue>);

impl Arguments {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_values(values: impl IntoIterator<Item = SqliteValue>) -> Self {
        Self(values.into_iter().collect())
    }

    pub fn push(&mut self, value: impl Into<SqliteValue>) {
        self.0.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Binds this argument list to `statement` starting at `offset`, returning
    /// the number of values consumed. A query split into several statements
    /// distributes one argument list across all of them.
    pub(crate) fn bind(&self, statement: &mut StatementHandle, offset: usize) -> Result<usize> {
        let count = statement.bind_parameter_count();

        for index in 0..count {
            let value = self.0.get(offset + index).ok_or_else(|| {
                Error::Protocol(format!(
                    "statement expects {} arguments, {} provided",
                    count,
                    self.0.len().saturating_sub(offset)
                ))
            })?;

            // bind parameters are 1-indexed
            statement.bind_value(index + 1, value)?;
        }

        Ok(count)
    }
}

impl FromIterator<SqliteValue> for Arguments {
    fn from_iter<I: IntoIterator<Item = SqliteValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Builds an [`Arguments`] list from a comma-separated list of bindable values.
///
/// ```
/// # use quarry::params;
/// let args = params![1, "name", None::<i64>];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Arguments::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Arguments::from_values([$($crate::SqliteValue::from($value)),+])
    };
}
