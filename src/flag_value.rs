use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::integral_i64;

/// FlagValue is the payload a named variation carries.
///
/// JSON integers deserialize as [FlagValue::Int] and every other number as [FlagValue::Float],
/// so payloads survive a trip through the distributed cache unchanged. Arrays, objects and
/// null are kept as raw JSON.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    Int(i64),
    Float(f64),
    Json(Value),
}

macro_rules! payload_conversions {
    ($($from:ty => $variant:ident($convert:expr);)*) => {
        $(
            impl From<$from> for FlagValue {
                fn from(value: $from) -> Self {
                    FlagValue::$variant($convert(value))
                }
            }
        )*
    };
}

payload_conversions! {
    bool => Bool(std::convert::identity);
    &str => Str(str::to_string);
    String => Str(std::convert::identity);
    f64 => Float(std::convert::identity);
    i64 => Int(std::convert::identity);
}

impl From<Value> for FlagValue {
    fn from(json: Value) -> Self {
        match json {
            Value::Bool(b) => FlagValue::Bool(b),
            Value::String(s) => FlagValue::Str(s),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => FlagValue::Int(i),
                (None, Some(f)) => FlagValue::Float(f),
                (None, None) => {
                    warn!("number {} has no f64 representation, keeping it as JSON", n);
                    FlagValue::Json(Value::Number(n))
                }
            },
            other => FlagValue::Json(other),
        }
    }
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FlagValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Integers, and floats that hold a whole number.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            FlagValue::Float(f) => integral_i64(*f),
            _ => None,
        }
    }

    /// Integral floats become JSON integers so they can be read back as either integers or
    /// floats.
    pub fn as_json(&self) -> Value {
        match self {
            FlagValue::Bool(b) => Value::from(*b),
            FlagValue::Str(s) => Value::from(s.as_str()),
            FlagValue::Float(f) => integral_i64(*f).map_or_else(|| Value::from(*f), Value::from),
            FlagValue::Int(i) => Value::from(*i),
            FlagValue::Json(v) => v.clone(),
        }
    }

    /// Converts the payload into `T`, or None if the payload has a different shape.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Option<T> {
        match serde_json::from_value(self.as_json()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("variation type mismatch for {:?}: {}", self, e);
                None
            }
        }
    }
}
