//! Binary property list codec.
//!
//! `AirPlay` 2 carries its `SETUP` bodies, peer lists and `/info` responses
//! as binary plists (`bplist00`). This module implements the subset of the
//! format those messages use.

mod decode;
mod encode;


pub use decode::decode;
pub use encode::encode;

use std::collections::HashMap;

use thiserror::Error;

/// A property list value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Boolean(bool),
    /// Signed integer (receivers answer with nothing wider)
    Integer(i64),
    /// Floating point number
    Real(f64),
    /// Seconds since 2001-01-01 00:00:00 UTC
    Date(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Data(Vec<u8>),
    /// Ordered list
    Array(Vec<Value>),
    /// String-keyed dictionary
    Dictionary(HashMap<String, Value>),
}

impl Value {
    /// Dictionary lookup; `None` when `self` is not a dictionary or the
    /// key is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dictionary(dict) => dict.get(key),
            _ => None,
        }
    }

    /// Integer view.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Unsigned view of an integer.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(i) => (*i).try_into().ok(),
            _ => None,
        }
    }

    /// String view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Data view.
    #[must_use]
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Array view.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(d: Vec<u8>) -> Self {
        Value::Data(d)
    }
}

/// Build a dictionary value from key/value pairs.
#[must_use]
pub fn dict(pairs: Vec<(&str, Value)>) -> Value {
    Value::Dictionary(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// Plist encode/decode errors.
#[derive(Debug, Error)]
pub enum PlistError {
    /// Too many objects for the fixed reference width.
    #[error("too many objects: {0}")]
    TooManyObjects(usize),

    /// Input is not a binary plist.
    #[error("missing bplist00 header")]
    BadHeader,

    /// Input ended early or an offset points outside the buffer.
    #[error("truncated plist")]
    Truncated,

    /// Object marker this codec does not handle.
    #[error("unsupported object marker 0x{0:02x}")]
    UnsupportedMarker(u8),

    /// Containers nested beyond the sanity limit (or a reference cycle).
    #[error("plist nesting too deep")]
    TooDeep,

    /// A dictionary key was not a string.
    #[error("non-string dictionary key")]
    BadKey,

    /// Malformed UTF-8/UTF-16 string payload.
    #[error("invalid string payload")]
    BadString,
}
