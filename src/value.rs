//! Scalar values accepted by the programmatic row path.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Unix seconds of `0001-01-01T00:00:00Z`, the zero timestamp.
const ZERO_TIMESTAMP_SECS: i64 = -62_135_596_800;

/// A single column value of a programmatic row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    /// Raw bytes. `None` is the "no bytes" value and encodes as NULL,
    /// unlike `Some(vec![])` which is an empty field.
    Bytes(Option<Vec<u8>>),
    Text(String),
    /// A value the row format has no representation for, tagged with its
    /// type name for diagnostics.
    Unsupported(String),
}

impl Value {
    /// The zero timestamp, rendered as `0000-00-00`.
    pub fn zero_timestamp() -> Self {
        Value::Timestamp(zero_timestamp())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Bytes(None))
    }

    /// Short type name used in logs and errors.
    pub fn kind(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int64",
            Value::UInt(_) => "uint64",
            Value::Float(_) => "float64",
            Value::Timestamp(_) => "timestamp",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Unsupported(kind) => kind,
        }
    }
}

pub(crate) fn zero_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIMESTAMP_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn is_zero_timestamp(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() == ZERO_TIMESTAMP_SECS && ts.timestamp_subsec_nanos() == 0
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

/// Naive timestamps are taken as UTC.
impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v.and_utc())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Some(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Some(v.to_vec()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timestamp() {
        let zero = zero_timestamp();
        assert_eq!(zero.to_rfc3339(), "0001-01-01T00:00:00+00:00");
        assert!(is_zero_timestamp(&zero));
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        assert!(!is_zero_timestamp(&epoch));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from(7u64), Value::UInt(7));
        assert_eq!(Value::from("abc"), Value::Text("abc".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }

    #[test]
    fn test_null_bytes_differ_from_empty() {
        assert!(Value::Bytes(None).is_null());
        assert!(!Value::Bytes(Some(Vec::new())).is_null());
    }
}
