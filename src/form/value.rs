use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

/// A node of the form data tree.
///
/// Equality is structural: two trees are equal when every leaf at every
/// address is equal. Numbers compare by numeric value, so `1.0 == 1.00`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Decimal),
    String(String),
    Bytes(Vec<u8>),
    File(FileValue),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FileValue {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileValue {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

impl Value {
    pub fn object() -> Self {
        Value::Object(BTreeMap::new())
    }

    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Text used when a value is pushed into a text-like control.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(value) => value.to_string(),
            Value::Number(value) => value.normalize().to_string(),
            Value::String(value) => value.clone(),
            Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Value::File(file) => file.name.clone(),
            Value::Array(_) | Value::Object(_) => self.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::File(_) => "file",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", serde_json::Value::from(self))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        decimal_from_f64(value).map_or(Value::Null, Value::Number)
    }
}

impl From<FileValue> for Value {
    fn from(value: FileValue) -> Self {
        Value::File(value)
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value>,
{
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<K, V> FromIterator<(K, V)> for Value
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Object(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => decimal_from_json(&number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            serde_json::Value::String(value) => Value::String(value),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Number(number) => json_number(*number),
            Value::String(value) => serde_json::Value::String(value.clone()),
            Value::Bytes(bytes) => serde_json::Value::Array(
                bytes
                    .iter()
                    .map(|byte| serde_json::Value::from(*byte))
                    .collect(),
            ),
            Value::File(file) => serde_json::json!({
                "name": file.name,
                "type": file.mime_type,
                "size": file.bytes.len(),
            }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), serde_json::Value::from(value)))
                    .collect(),
            ),
        }
    }
}

pub(crate) fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}

pub(crate) fn decimal_from_str(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn decimal_from_json(number: &serde_json::Number) -> Option<Decimal> {
    if let Some(value) = number.as_i64() {
        return Some(Decimal::from(value));
    }
    if let Some(value) = number.as_u64() {
        return Some(Decimal::from(value));
    }
    decimal_from_str(&number.to_string()).or_else(|| number.as_f64().and_then(decimal_from_f64))
}

fn json_number(number: Decimal) -> serde_json::Value {
    let number = number.normalize();
    if number.scale() == 0 {
        if let Some(value) = number.to_i64() {
            return serde_json::Value::from(value);
        }
    }
    number
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map_or(serde_json::Value::Null, serde_json::Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_by_value() {
        let a = Value::Number(Decimal::from_str("1.0").unwrap());
        let b = Value::Number(Decimal::from_str("1.00").unwrap());
        assert_eq!(a, b);
        assert_ne!(a, Value::from("1"));
    }

    #[test]
    fn json_conversion_keeps_shape() {
        let json = serde_json::json!({
            "name": "Ada",
            "age": 36,
            "ratio": 0.5,
            "tags": ["a", null, true],
        });
        let value = Value::from(json.clone());
        assert_eq!(
            value
                .as_object()
                .and_then(|entries| entries.get("tags"))
                .and_then(Value::as_array)
                .map(Vec::len),
            Some(3)
        );
        assert_eq!(serde_json::Value::from(&value), json);
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(Value::from(f64::NAN), Value::Null);
        assert_eq!(Value::from(f64::INFINITY), Value::Null);
    }

    #[test]
    fn display_string_for_scalars() {
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::from(12_i64).to_display_string(), "12");
        assert_eq!(
            Value::Number(Decimal::from_str("2.50").unwrap()).to_display_string(),
            "2.5"
        );
    }
}
