use serde_json::Value as JsonValue;

use crate::value::{Attributes, Value};

pub trait FromJson {
    fn from_json_str(json: &str) -> serde_json::Result<Self>
    where
        Self: Sized;

    fn from_json(json: JsonValue) -> serde_json::Result<Self>
    where
        Self: Sized;
}

impl<T> FromJson for T
where
    T: serde::de::DeserializeOwned,
{
    fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn from_json(json: JsonValue) -> serde_json::Result<Self>
    where
        Self: Sized,
    {
        serde_json::from_value(json)
    }
}

/// Scalars map onto their own variants; arrays and objects stay JSON.
pub fn value_from_json(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(v) => Value::Bool(v),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Json(JsonValue::Number(n))),
        },
        JsonValue::String(s) => Value::Text(s),
        other @ (JsonValue::Array(_) | JsonValue::Object(_)) => Value::Json(other),
    }
}

/// Reads a JSON object (a row as produced by `row_to_json`) into attributes.
pub fn attributes_from_json(json: JsonValue) -> anyhow::Result<Attributes> {
    match json {
        JsonValue::Object(map) => Ok(map
            .into_iter()
            .map(|(column, value)| (column, value_from_json(value)))
            .collect()),
        other => anyhow::bail!("expected a JSON object row, got: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_object_becomes_attributes() {
        let row = serde_json::json!({"id": 4, "name": "car", "price": 1.5, "tags": ["a"], "gone": null});
        let attrs = attributes_from_json(row).unwrap();
        assert_eq!(attrs["id"], Value::Int(4));
        assert_eq!(attrs["name"], Value::from("car"));
        assert_eq!(attrs["price"], Value::Float(1.5));
        assert_eq!(attrs["tags"], Value::Json(serde_json::json!(["a"])));
        assert_eq!(attrs["gone"], Value::Null);
    }

    #[test]
    fn non_object_rows_are_rejected() {
        assert!(attributes_from_json(serde_json::json!([1, 2])).is_err());
    }
}
