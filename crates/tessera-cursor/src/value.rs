//! Column values and data types.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tessera_common::{TesseraError, TesseraResult};

/// SQL data type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean.
    Boolean,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit floating point.
    Double,
    /// Variable-length character string.
    Varchar,
    /// Variable-length binary string.
    Varbinary,
    /// Binary large object.
    Blob,
    /// Character large object.
    Clob,
}

impl DataType {
    /// Returns true for BLOB and CLOB.
    pub fn is_lob(&self) -> bool {
        matches!(self, DataType::Blob | DataType::Clob)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int => "INTEGER",
            DataType::BigInt => "BIGINT",
            DataType::Double => "DOUBLE",
            DataType::Varchar => "VARCHAR",
            DataType::Varbinary => "VARCHAR FOR BIT DATA",
            DataType::Blob => "BLOB",
            DataType::Clob => "CLOB",
        };
        f.write_str(name)
    }
}

/// A column value.
///
/// LOB payloads are reference counted so that snapshots, locators and
/// streams share one copy.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit floating point.
    Double(f64),
    /// String value.
    String(String),
    /// Binary value.
    Bytes(Bytes),
    /// Binary large object.
    Blob(Bytes),
    /// Character large object.
    Clob(Arc<str>),
}

impl Value {
    /// Creates a string value.
    pub fn string(v: impl Into<String>) -> Self {
        Value::String(v.into())
    }

    /// Creates a BLOB value.
    pub fn blob(v: impl Into<Bytes>) -> Self {
        Value::Blob(v.into())
    }

    /// Creates a CLOB value.
    pub fn clob(v: impl Into<Arc<str>>) -> Self {
        Value::Clob(v.into())
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for BLOB and CLOB values.
    pub fn is_lob(&self) -> bool {
        matches!(self, Value::Blob(_) | Value::Clob(_))
    }

    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::String(_) => "VARCHAR",
            Value::Bytes(_) => "VARCHAR FOR BIT DATA",
            Value::Blob(_) => "BLOB",
            Value::Clob(_) => "CLOB",
        }
    }

    /// Storage size in bytes, used for space accounting.
    pub fn size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int(_) => 4,
            Value::BigInt(_) | Value::Double(_) => 8,
            Value::String(s) => s.len(),
            Value::Bytes(b) | Value::Blob(b) => b.len(),
            Value::Clob(c) => c.len(),
        }
    }

    /// Converts this value to an i64.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(i64::from(*i)),
            Value::BigInt(i) => Some(*i),
            Value::Double(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Converts this value to an f64.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::BigInt(i) => Some(*i as f64),
            Value::Double(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Converts this value to a string. Binary values have no string form.
    pub fn to_string_value(&self) -> Option<String> {
        match self {
            Value::Null | Value::Bytes(_) | Value::Blob(_) => None,
            Value::Boolean(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::BigInt(i) => Some(i.to_string()),
            Value::Double(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Clob(c) => Some(c.to_string()),
        }
    }

    /// Converts this value for storage in a column of type `target`.
    pub fn coerce(self, target: DataType) -> TesseraResult<Value> {
        let mismatch = |v: &Value| TesseraError::type_mismatch(target.to_string(), v.type_name());
        let coerced = match (target, self) {
            (_, Value::Null) => Value::Null,
            (DataType::Boolean, Value::Boolean(b)) => Value::Boolean(b),
            (DataType::Int, v) => {
                let wide = v.to_i64().ok_or_else(|| mismatch(&v))?;
                Value::Int(i32::try_from(wide).map_err(|_| mismatch(&v))?)
            }
            (DataType::BigInt, v) => Value::BigInt(v.to_i64().ok_or_else(|| mismatch(&v))?),
            (DataType::Double, v) => Value::Double(v.to_f64().ok_or_else(|| mismatch(&v))?),
            (DataType::Varchar, Value::Clob(c)) => Value::String(c.to_string()),
            (DataType::Varchar, v) => Value::String(v.to_string_value().ok_or_else(|| mismatch(&v))?),
            (DataType::Varbinary, Value::Bytes(b) | Value::Blob(b)) => Value::Bytes(b),
            (DataType::Blob, Value::Bytes(b) | Value::Blob(b)) => Value::Blob(b),
            (DataType::Clob, Value::Clob(c)) => Value::Clob(c),
            (DataType::Clob, Value::String(s)) => Value::Clob(s.into()),
            (_, v) => return Err(mismatch(&v)),
        };
        Ok(coerced)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Blob(b) => write!(f, "<BLOB {} bytes>", b.len()),
            Value::Clob(c) => write!(f, "<CLOB {} chars>", c.chars().count()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
