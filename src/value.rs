use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Attribute map of a record, in insertion order.
pub type Attributes = IndexMap<String, Value>;

/// A column value. Every value reaching the database travels as a bound
/// parameter, never as SQL text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Mirrors a loose truthiness check on keys: `Null`, `0`, `false` and the
    /// empty string do not identify a row.
    pub fn is_present_key(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Text(v) => !v.is_empty(),
            _ => true,
        }
    }
}

macro_rules! value_from {
    ($source:ty => $variant:ident) => {
        impl From<$source> for Value {
            fn from(value: $source) -> Self {
                Value::$variant(value.into())
            }
        }
    };
}
value_from!(bool => Bool);
value_from!(i64 => Int);
value_from!(i32 => Int);
value_from!(i16 => Int);
value_from!(u32 => Int);
value_from!(u16 => Int);
value_from!(u8 => Int);
value_from!(f64 => Float);
value_from!(f32 => Float);
value_from!(String => Text);
value_from!(DateTime<Utc> => Timestamp);
value_from!(serde_json::Value => Json);
value_from!(Vec<u8> => Bytes);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Json(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Builds an [`Attributes`] map: `attributes! { "name" => "one", "age" => 3 }`.
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::value::Attributes::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::Attributes::new();
        $(map.insert(::std::string::String::from($key), $crate::value::Value::from($value));)+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(3_i32), Value::Int(3));
        assert_eq!(Value::from("a"), Value::Text("a".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(2.5_f64)), Value::Float(2.5));
    }

    #[test]
    fn key_presence() {
        assert!(!Value::Null.is_present_key());
        assert!(!Value::Int(0).is_present_key());
        assert!(!Value::from("").is_present_key());
        assert!(Value::Int(7).is_present_key());
        assert!(Value::from("abc").is_present_key());
    }

    #[test]
    fn attributes_macro_keeps_order() {
        let attrs = crate::attributes! { "b" => 1, "a" => "x" };
        let keys: Vec<_> = attrs.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
    }
}
