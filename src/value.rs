use crate::error::{Error, Result};

/// An owned SQLite value.
///
/// SQLite stores every value as one of five fundamental types; this enum is
/// the Rust-side image of that storage class.
#[derive(Debug, Clone, PartialEq)]
pub enum SqliteValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqliteValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqliteValue::Null)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            SqliteValue::Null => "NULL",
            SqliteValue::Integer(_) => "INTEGER",
            SqliteValue::Real(_) => "REAL",
            SqliteValue::Text(_) => "TEXT",
            SqliteValue::Blob(_) => "BLOB",
        }
    }
}

impl From<i64> for SqliteValue {
    fn from(value: i64) -> Self {
        SqliteValue::Integer(value)
    }
}

impl From<i32> for SqliteValue {
    fn from(value: i32) -> Self {
        SqliteValue::Integer(i64::from(value))
    }
}

impl From<bool> for SqliteValue {
    fn from(value: bool) -> Self {
        SqliteValue::Integer(i64::from(value))
    }
}

impl From<f64> for SqliteValue {
    fn from(value: f64) -> Self {
        SqliteValue::Real(value)
    }
}

impl From<&str> for SqliteValue {
    fn from(value: &str) -> Self {
        SqliteValue::Text(value.to_owned())
    }
}

impl From<String> for SqliteValue {
    fn from(value: String) -> Self {
        SqliteValue::Text(value)
    }
}

impl From<&[u8]> for SqliteValue {
    fn from(value: &[u8]) -> Self {
        SqliteValue::Blob(value.to_vec())
    }
}

impl From<Vec<u8>> for SqliteValue {
    fn from(value: Vec<u8>) -> Self {
        SqliteValue::Blob(value)
    }
}

impl<T> From<Option<T>> for SqliteValue
where
    T: Into<SqliteValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => SqliteValue::Null,
        }
    }
}

/// Conversion out of a [`SqliteValue`].
pub trait FromValue: Sized {
    fn from_value(value: &SqliteValue) -> Result<Self>;
}

fn unexpected<T>(expected: &str, value: &SqliteValue) -> Result<T> {
    Err(Error::Decode(format!(
        "expected {expected}, got {}",
        value.type_name()
    )))
}

impl FromValue for i64 {
    fn from_value(value: &SqliteValue) -> Result<Self> {
        match value {
            SqliteValue::Integer(i) => Ok(*i),
            other => unexpected("INTEGER", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &SqliteValue) -> Result<Self> {
        let i = i64::from_value(value)?;
        i32::try_from(i).map_err(|_| Error::Decode(format!("integer {i} out of range for i32")))
    }
}

impl FromValue for bool {
    fn from_value(value: &SqliteValue) -> Result<Self> {
        Ok(i64::from_value(value)? != 0)
    }
}

impl FromValue for f64 {
    fn from_value(value: &SqliteValue) -> Result<Self> {
        match value {
            SqliteValue::Real(f) => Ok(*f),
            SqliteValue::Integer(i) => Ok(*i as f64),
            other => unexpected("REAL", other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &SqliteValue) -> Result<Self> {
        match value {
            SqliteValue::Text(s) => Ok(s.clone()),
            other => unexpected("TEXT", other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &SqliteValue) -> Result<Self> {
        match value {
            SqliteValue::Blob(b) => Ok(b.clone()),
            SqliteValue::Text(s) => Ok(s.clone().into_bytes()),
            other => unexpected("BLOB", other),
        }
    }
}

impl<T> FromValue for Option<T>
where
    T: FromValue,
{
    fn from_value(value: &SqliteValue) -> Result<Self> {
        match value {
            SqliteValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
