//! Database values and their type tags
//!
//! [`SqlValue`] is the currency between mapped records, the filter translator and
//! the driver. Every bound parameter carries a [`DbType`] so that NULLs and empty
//! arrays can be sent with an explicit type.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::{DatabaseError, Error};

/// Database type tag attached to columns and bound parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    /// `text`
    Text,
    /// `bigint`
    Integer,
    /// `double precision`
    Double,
    /// `boolean`
    Boolean,
    /// `timestamptz`
    Timestamp,
    /// `text[]`
    TextArray,
    /// `bigint[]`
    IntegerArray,
    /// `double precision[]`
    DoubleArray,
    /// `timestamptz[]`
    TimestampArray,
}

impl DbType {
    /// The array type whose elements are of this type
    pub fn array(self) -> Option<DbType> {
        match self {
            Self::Text => Some(Self::TextArray),
            Self::Integer => Some(Self::IntegerArray),
            Self::Double => Some(Self::DoubleArray),
            Self::Timestamp => Some(Self::TimestampArray),
            _ => None,
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "bigint"),
            Self::Double => write!(f, "double precision"),
            Self::Boolean => write!(f, "boolean"),
            Self::Timestamp => write!(f, "timestamptz"),
            Self::TextArray => write!(f, "text[]"),
            Self::IntegerArray => write!(f, "bigint[]"),
            Self::DoubleArray => write!(f, "double precision[]"),
            Self::TimestampArray => write!(f, "timestamptz[]"),
        }
    }
}

/// A single database value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Discriminant of a field-less enum; bound as an integer
    Enum(i64),
    TextArray(Vec<String>),
    IntegerArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    TimestampArray(Vec<DateTime<Utc>>),
}

impl SqlValue {
    /// Type tag of the value, `None` for NULL
    pub fn db_type(&self) -> Option<DbType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(DbType::Boolean),
            Self::Integer(_) | Self::Enum(_) => Some(DbType::Integer),
            Self::Double(_) => Some(DbType::Double),
            Self::Text(_) => Some(DbType::Text),
            Self::Timestamp(_) => Some(DbType::Timestamp),
            Self::TextArray(_) => Some(DbType::TextArray),
            Self::IntegerArray(_) => Some(DbType::IntegerArray),
            Self::DoubleArray(_) => Some(DbType::DoubleArray),
            Self::TimestampArray(_) => Some(DbType::TimestampArray),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// NULL or a whitespace-only string
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Enum(_) => "enum",
            Self::TextArray(_) => "text array",
            Self::IntegerArray(_) => "integer array",
            Self::DoubleArray(_) => "double array",
            Self::TimestampArray(_) => "timestamp array",
        }
    }

    /// Equality key of the value, `None` for NULL
    pub fn key(&self) -> Option<ValueKey> {
        let key = match self {
            Self::Null => return None,
            Self::Boolean(b) => ValueKey::Boolean(*b),
            Self::Integer(i) | Self::Enum(i) => ValueKey::Integer(*i),
            Self::Double(d) => ValueKey::double(*d),
            Self::Text(t) => ValueKey::Text(t.clone()),
            Self::Timestamp(t) => ValueKey::Timestamp(*t),
            Self::TextArray(items) => {
                ValueKey::Array(items.iter().cloned().map(ValueKey::Text).collect())
            }
            Self::IntegerArray(items) => {
                ValueKey::Array(items.iter().copied().map(ValueKey::Integer).collect())
            }
            Self::DoubleArray(items) => {
                ValueKey::Array(items.iter().copied().map(ValueKey::double).collect())
            }
            Self::TimestampArray(items) => {
                ValueKey::Array(items.iter().copied().map(ValueKey::Timestamp).collect())
            }
        };
        Some(key)
    }

    /// Collect scalar values of one element type into an array value
    ///
    /// NULL elements are dropped; they never match an `= ANY(...)` predicate.
    pub fn collect_array(element: DbType, values: Vec<SqlValue>) -> Result<SqlValue, ValueError> {
        let values = values.into_iter().filter(|v| !v.is_null());
        let array = match element {
            DbType::Text => SqlValue::TextArray(values.map(String::try_from).collect::<Result<_, _>>()?),
            DbType::Integer => {
                SqlValue::IntegerArray(values.map(i64::try_from).collect::<Result<_, _>>()?)
            }
            DbType::Double => {
                SqlValue::DoubleArray(values.map(f64::try_from).collect::<Result<_, _>>()?)
            }
            DbType::Timestamp => SqlValue::TimestampArray(
                values
                    .map(DateTime::<Utc>::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            _ => return Err(ValueError::new("array element", "boolean or array")),
        };
        Ok(array)
    }
}

/// Hashable form of a non-NULL [`SqlValue`] under database equality
///
/// Doubles compare by value: `-0.0` equals `0.0` and every NaN equals every
/// other NaN, as PostgreSQL orders `double precision`. Enum discriminants
/// compare as the integers they are bound as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Boolean(bool),
    Integer(i64),
    Double(u64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<ValueKey>),
}

impl ValueKey {
    fn double(value: f64) -> Self {
        let normalized = if value.is_nan() {
            f64::NAN
        } else if value == 0.0 {
            0.0
        } else {
            value
        };
        Self::Double(normalized.to_bits())
    }
}

/// A database value could not be converted into a record field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert {found} value into {expected}")]
pub struct ValueError {
    /// The type the record field expects
    pub expected: &'static str,
    /// The kind of value that was supplied
    pub found: &'static str,
}

impl ValueError {
    pub fn new(expected: &'static str, found: &'static str) -> Self {
        Self { expected, found }
    }

    fn mismatch(expected: &'static str, value: &SqlValue) -> Self {
        Self::new(expected, value.variant_name())
    }
}

impl From<ValueError> for Error {
    fn from(err: ValueError) -> Self {
        Error::from(DatabaseError::type_conversion(err.to_string()))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i16> for SqlValue {
    fn from(value: i16) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(value: Vec<String>) -> Self {
        Self::TextArray(value)
    }
}

impl From<Vec<i64>> for SqlValue {
    fn from(value: Vec<i64>) -> Self {
        Self::IntegerArray(value)
    }
}

impl From<Vec<f64>> for SqlValue {
    fn from(value: Vec<f64>) -> Self {
        Self::DoubleArray(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl TryFrom<SqlValue> for bool {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Boolean(v) => Ok(v),
            other => Err(ValueError::mismatch("bool", &other)),
        }
    }
}

impl TryFrom<SqlValue> for i64 {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Integer(v) | SqlValue::Enum(v) => Ok(v),
            other => Err(ValueError::mismatch("i64", &other)),
        }
    }
}

impl TryFrom<SqlValue> for i32 {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Integer(v) | SqlValue::Enum(v) => {
                i32::try_from(v).map_err(|_| ValueError::new("i32", "out of range integer"))
            }
            other => Err(ValueError::mismatch("i32", &other)),
        }
    }
}

impl TryFrom<SqlValue> for f64 {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Double(v) => Ok(v),
            SqlValue::Integer(v) => Ok(v as f64),
            other => Err(ValueError::mismatch("f64", &other)),
        }
    }
}

impl TryFrom<SqlValue> for String {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Text(v) => Ok(v),
            other => Err(ValueError::mismatch("String", &other)),
        }
    }
}

impl TryFrom<SqlValue> for DateTime<Utc> {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Timestamp(v) => Ok(v),
            other => Err(ValueError::mismatch("DateTime<Utc>", &other)),
        }
    }
}

impl TryFrom<SqlValue> for Vec<String> {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::TextArray(v) => Ok(v),
            other => Err(ValueError::mismatch("Vec<String>", &other)),
        }
    }
}

impl TryFrom<SqlValue> for Vec<i64> {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::IntegerArray(v) => Ok(v),
            other => Err(ValueError::mismatch("Vec<i64>", &other)),
        }
    }
}

impl TryFrom<SqlValue> for Vec<f64> {
    type Error = ValueError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::DoubleArray(v) => Ok(v),
            other => Err(ValueError::mismatch("Vec<f64>", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values() {
        assert!(SqlValue::Null.is_blank());
        assert!(SqlValue::from("   ").is_blank());
        assert!(!SqlValue::from("x").is_blank());
        assert!(!SqlValue::from(0_i64).is_blank());
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("a")), SqlValue::Text("a".to_string()));
    }

    #[test]
    fn test_keys_follow_database_equality() {
        assert_eq!(SqlValue::Null.key(), None);
        assert_eq!(SqlValue::Double(-0.0).key(), SqlValue::Double(0.0).key());
        assert_eq!(SqlValue::Double(f64::NAN).key(), SqlValue::Double(-f64::NAN).key());
        assert_ne!(SqlValue::Double(1.0).key(), SqlValue::Double(f64::NAN).key());
        assert_eq!(SqlValue::Enum(2).key(), SqlValue::Integer(2).key());
        assert_ne!(SqlValue::Integer(1).key(), SqlValue::Double(1.0).key());
        assert_eq!(
            SqlValue::DoubleArray(vec![0.0, 2.5]).key(),
            SqlValue::DoubleArray(vec![-0.0, 2.5]).key()
        );
    }

    #[test]
    fn test_enum_reads_as_integer() {
        assert_eq!(SqlValue::Enum(3).db_type(), Some(DbType::Integer));
        assert_eq!(i64::try_from(SqlValue::Enum(3)), Ok(3));
    }

    #[test]
    fn test_mismatch_is_reported() {
        let err = i64::try_from(SqlValue::Text("abc".to_string())).unwrap_err();
        assert_eq!(err.to_string(), "cannot convert text value into i64");
    }

    #[test]
    fn test_collect_array_skips_nulls() {
        let array = SqlValue::collect_array(
            DbType::Text,
            vec![SqlValue::from("a"), SqlValue::Null, SqlValue::from("b")],
        )
        .unwrap();
        assert_eq!(
            array,
            SqlValue::TextArray(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_collect_array_rejects_mixed_types() {
        let err = SqlValue::collect_array(DbType::Integer, vec![SqlValue::from("a")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_array_of_boolean_is_unsupported() {
        assert_eq!(DbType::Boolean.array(), None);
        assert_eq!(DbType::Integer.array(), Some(DbType::IntegerArray));
    }
}
