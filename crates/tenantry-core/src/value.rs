//! Dynamic SQL values.

use serde::{Deserialize, Serialize};

use crate::error::{Error, TypeError};

/// A dynamically-typed SQL value.
///
/// Every record field crosses the `Model` accessor boundary as a `Value`, and
/// every statement parameter is bound as one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Timestamp with timezone (microseconds since epoch, UTC)
    TimestampTz(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),

    /// Array of values
    Array(Vec<Value>),

    /// SQL DEFAULT keyword
    Default,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this is the zero value of its type.
    ///
    /// NULL, empty text/bytes/arrays, numeric zero, `false` and JSON `null`
    /// all count as zero. Used for "not supplied" checks on primary keys,
    /// required-field validation and delete filters.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null | Value::Default => true,
            Value::Bool(v) => !v,
            Value::SmallInt(v) => *v == 0,
            Value::Int(v) => *v == 0,
            Value::BigInt(v) | Value::TimestampTz(v) => *v == 0,
            Value::Double(v) => *v == 0.0,
            Value::Decimal(s) | Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Uuid(u) => u.iter().all(|b| *b == 0),
            Value::Json(v) => v.is_null(),
            Value::Array(items) => items.is_empty(),
        }
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Array(_) => "ARRAY",
            Value::Default => "DEFAULT",
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as text.
    ///
    /// Matches the store's `::text` cast for every kind accepted by
    /// [`crate::lookup::has_stable_text`].
    ///
    /// Returns `None` for NULL, which never takes part in a lookup key match.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null | Value::Default => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::SmallInt(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::BigInt(v) | Value::TimestampTz(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Decimal(s) | Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(format!("\\x{}", hex(b))),
            Value::Uuid(u) => Some(format_uuid(u)),
            Value::Json(v) => Some(v.to_string()),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| item.to_text().unwrap_or_else(|| "NULL".to_string()))
                    .collect();
                Some(format!("{{{}}}", parts.join(",")))
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn format_uuid(u: &[u8; 16]) -> String {
    let h = hex(u);
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
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

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
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

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Array(v.into_iter().map(Value::Text).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Array(v.into_iter().map(Value::BigInt).collect())
    }
}

// TryFrom implementations for extracting values

fn type_mismatch(expected: &'static str, actual: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: actual.type_name().to_string(),
        column: None,
        rust_type: None,
    })
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::SmallInt(v) => Ok(v != 0),
            Value::Int(v) => Ok(v != 0),
            Value::BigInt(v) => Ok(v != 0),
            other => Err(type_mismatch("bool", &other)),
        }
    }
}

impl TryFrom<Value> for i16 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::SmallInt(v) => Ok(v),
            Value::Bool(v) => Ok(i16::from(v)),
            other => Err(type_mismatch("i16", &other)),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = Error;

    /// Accepts a `BIGINT` when it fits, since generated keys usually come back wide.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::SmallInt(v) => Ok(i32::from(v)),
            Value::Int(v) => Ok(v),
            Value::BigInt(v) => i32::try_from(v).map_err(|_| {
                Error::Type(TypeError {
                    expected: "i32",
                    actual: format!("BIGINT {v} out of range"),
                    column: None,
                    rust_type: Some("i32"),
                })
            }),
            Value::Bool(v) => Ok(i32::from(v)),
            other => Err(type_mismatch("i32", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::SmallInt(v) => Ok(i64::from(v)),
            Value::Int(v) => Ok(i64::from(v)),
            Value::BigInt(v) | Value::TimestampTz(v) => Ok(v),
            Value::Bool(v) => Ok(i64::from(v)),
            other => Err(type_mismatch("i64", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Double(v) => Ok(v),
            Value::SmallInt(v) => Ok(f64::from(v)),
            Value::Int(v) => Ok(f64::from(v)),
            Value::Decimal(s) => s.parse().map_err(|_| {
                Error::Type(TypeError {
                    expected: "f64",
                    actual: format!("DECIMAL '{s}'"),
                    column: None,
                    rust_type: Some("f64"),
                })
            }),
            other => Err(type_mismatch("f64", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Decimal(v) => Ok(v),
            other => Err(type_mismatch("String", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            other => Err(type_mismatch("Vec<u8>", &other)),
        }
    }
}

impl TryFrom<Value> for serde_json::Value {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Null => Ok(serde_json::Value::Null),
            Value::Text(s) => serde_json::from_str(&s).map_err(|e| {
                Error::Type(TypeError {
                    expected: "valid JSON",
                    actual: format!("invalid JSON: {}", e),
                    column: None,
                    rust_type: None,
                })
            }),
            other => Err(type_mismatch("JSON", &other)),
        }
    }
}

impl TryFrom<Value> for [u8; 16] {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::Bytes(v) if v.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&v);
                Ok(arr)
            }
            other => Err(type_mismatch("UUID", &other)),
        }
    }
}

/// TryFrom for `Option<T>` - returns None for Null, tries to convert otherwise
impl<T> TryFrom<Value> for Option<T>
where
    T: TryFrom<Value, Error = Error>,
{
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(None),
            v => T::try_from(v).map(Some),
        }
    }
}

impl TryFrom<Value> for Vec<String> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => items.into_iter().map(String::try_from).collect(),
            other => Err(type_mismatch("text array", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<i64> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => items.into_iter().map(i64::try_from).collect(),
            other => Err(type_mismatch("bigint array", &other)),
        }
    }
}
