use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::integral_i64;

/// AttributeValue is the value of one named attribute of an [crate::EvaluationContext], as
/// seen by targeting rules.
///
/// Every JSON number is held as an f64.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Array(Vec<AttributeValue>),
    Number(f64),
    Bool(bool),
    Object(HashMap<String, AttributeValue>),
    Null,
}

macro_rules! scalar_conversions {
    ($($from:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl From<$from> for AttributeValue {
                fn from($v: $from) -> Self {
                    $body
                }
            }
        )*
    };
}

scalar_conversions! {
    &str => |s| AttributeValue::String(s.to_string());
    String => |s| AttributeValue::String(s);
    bool => |b| AttributeValue::Bool(b);
    f64 => |f| AttributeValue::Number(f);
    i64 => |i| AttributeValue::Number(i as f64);
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(items: Vec<T>) -> Self {
        AttributeValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for AttributeValue {
    fn from(json: Value) -> Self {
        match json {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Number(n) => n.as_f64().map(AttributeValue::Number).unwrap_or_else(|| {
                warn!("number {} has no f64 representation, keeping it as a string", n);
                AttributeValue::String(n.to_string())
            }),
            Value::String(s) => AttributeValue::String(s),
            Value::Array(items) => items.into(),
            Value::Object(fields) => AttributeValue::Object(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, value.into()))
                    .collect(),
            ),
        }
    }
}

impl AttributeValue {
    /// The string, if this is a string. Other variants are not converted.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a float for numbers and for strings that parse as numbers.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            AttributeValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Renders scalar values as the string a targeting rule compares against. Integral numbers
    /// render without a fractional part, so `42.0` compares equal to `"42"`.
    pub fn to_comparable_string(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Bool(b) => Some(b.to_string()),
            AttributeValue::Number(f) => Some(match integral_i64(*f) {
                Some(i) => i.to_string(),
                None => f.to_string(),
            }),
            AttributeValue::Array(_) | AttributeValue::Object(_) | AttributeValue::Null => None,
        }
    }

    /// Returns the first value satisfying `p`: the value itself, or for arrays the first
    /// element. Null never matches.
    pub fn find<P>(&self, p: P) -> Option<&AttributeValue>
    where
        P: Fn(&AttributeValue) -> bool,
    {
        match self {
            AttributeValue::Null => None,
            AttributeValue::Array(items) => items.iter().find(|item| p(item)),
            _ => Some(self).filter(|value| p(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AttributeValue;
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test_case("1.0", AttributeValue::Number(1.0))]
    #[test_case("1", AttributeValue::Number(1.0))]
    #[test_case("true", AttributeValue::Bool(true))]
    #[test_case("\"pro\"", AttributeValue::String("pro".to_string()))]
    #[test_case("null", AttributeValue::Null)]
    #[test_case("[1, \"a\"]", AttributeValue::Array(vec![1.0.into(), "a".into()]))]
    fn parses_json(json: &str, expected: AttributeValue) {
        assert_that!(serde_json::from_str::<AttributeValue>(json).unwrap()).is_equal_to(expected);
    }

    #[test]
    fn converts_nested_json() {
        let value = AttributeValue::from(json!({"plan": "pro", "seats": 12, "tags": ["a"]}));
        assert_that!(value).is_equal_to(AttributeValue::Object(hashmap! {
            "plan".to_string() => "pro".into(),
            "seats".to_string() => 12.0.into(),
            "tags".to_string() => vec!["a"].into(),
        }));
    }

    #[test_case(AttributeValue::Number(42.0), Some(42.0))]
    #[test_case(AttributeValue::String("42.5".into()), Some(42.5))]
    #[test_case(AttributeValue::String(" 7 ".into()), Some(7.0))]
    #[test_case(AttributeValue::String("seven".into()), None)]
    #[test_case(AttributeValue::String("NaN".into()), None)]
    #[test_case(AttributeValue::Bool(true), None)]
    fn numeric_coercion(value: AttributeValue, expected: Option<f64>) {
        assert_that!(value.to_f64()).is_equal_to(expected);
    }

    #[test_case(AttributeValue::Number(42.0), Some("42"))]
    #[test_case(AttributeValue::Number(1.5), Some("1.5"))]
    #[test_case(AttributeValue::Bool(false), Some("false"))]
    #[test_case(AttributeValue::String("Pro".into()), Some("Pro"))]
    #[test_case(AttributeValue::Null, None)]
    fn comparable_strings(value: AttributeValue, expected: Option<&str>) {
        assert_that!(value.to_comparable_string()).is_equal_to(expected.map(String::from));
    }

    #[test]
    fn find_searches_arrays() {
        let groups: AttributeValue = vec!["beta", "staff"].into();
        let found = groups.find(|v| v.as_str() == Some("staff"));
        assert_that!(found).is_some();
        assert_that!(AttributeValue::Null.find(|_| true)).is_none();
        assert_that!(AttributeValue::from("beta").find(|v| v.as_str() == Some("staff"))).is_none();
    }
}
