use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EncodingError;
use crate::types::MAX_INDEX_KEY_LENGTH;

/// A value stored in an index node.
///
/// Variant order is the cross-type sort order: every `Null` sorts before
/// every number, every number before every string, and so on. `Int` and
/// `Double` share a rank and compare numerically. `MinValue` and `MaxValue`
/// only ever appear in the head and tail sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexKey {
    MinValue,
    Null,
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<IndexKey>),
    Binary(Vec<u8>),
    Boolean(bool),
    MaxValue,
}

impl IndexKey {
    /// Position of this key's type in the cross-type order.
    pub fn type_rank(&self) -> u8 {
        match self {
            IndexKey::MinValue => 0,
            IndexKey::Null => 1,
            IndexKey::Int(_) | IndexKey::Double(_) => 2,
            IndexKey::String(_) => 3,
            IndexKey::Array(_) => 4,
            IndexKey::Binary(_) => 5,
            IndexKey::Boolean(_) => 6,
            IndexKey::MaxValue => 7,
        }
    }

    /// Convert a JSON value into a key. Objects cannot be indexed.
    ///
    /// Integers that fit an `i64` stay exact; anything else becomes a double.
    pub fn from_json(value: &Value) -> Result<Self, EncodingError> {
        match value {
            Value::Null => Ok(IndexKey::Null),
            Value::Bool(b) => Ok(IndexKey::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(IndexKey::Int(i)),
                None => n
                    .as_f64()
                    .map(IndexKey::Double)
                    .ok_or(EncodingError::UnsupportedKeyType("number")),
            },
            Value::String(s) => Ok(IndexKey::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(IndexKey::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(IndexKey::Array),
            Value::Object(_) => Err(EncodingError::UnsupportedKeyType("object")),
        }
    }

    /// JSON rendering, used when keys are reported back to callers.
    pub fn to_json(&self) -> Value {
        match self {
            IndexKey::MinValue => Value::String("$minValue".to_string()),
            IndexKey::MaxValue => Value::String("$maxValue".to_string()),
            IndexKey::Null => Value::Null,
            IndexKey::Boolean(b) => Value::Bool(*b),
            IndexKey::Int(i) => Value::from(*i),
            IndexKey::Double(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            IndexKey::String(s) => Value::String(s.clone()),
            IndexKey::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            IndexKey::Array(items) => Value::Array(items.iter().map(IndexKey::to_json).collect()),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, IndexKey::MinValue | IndexKey::MaxValue)
    }

    /// MessagePack encoding, bounded by [`MAX_INDEX_KEY_LENGTH`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let bytes = rmp_serde::to_vec(self).map_err(|e| EncodingError::Serialize(e.to_string()))?;
        if bytes.len() > MAX_INDEX_KEY_LENGTH {
            return Err(EncodingError::KeyTooLarge {
                max: MAX_INDEX_KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        rmp_serde::from_slice(bytes).map_err(|e| EncodingError::Deserialize(e.to_string()))
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
