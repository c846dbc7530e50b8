use crate::envelope::PreviewLimits;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Key used to mark a binary reference inside plain JSON.
pub const BINARY_REF_KEY: &str = "$binary";

/// Dynamic value type for component parameters and port values.
///
/// Serializes as plain JSON so definitions produced by the graph editor
/// round-trip without any wrapping. Binary artifacts are encoded as
/// `{"$binary": {"uri": ..., "size": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    /// Kept as the JSON number so integers beyond 2^53 cross edges intact.
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    BinaryRef(BinaryRef),
}

/// Reference to a binary artifact that lives outside the value itself
/// (a file collected from a sandbox, a rendered chart).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryRef {
    pub uri: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Integers, and floats with no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryRef> {
        match self {
            Value::BinaryRef(r) => Some(r),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::BinaryRef(_) => "binary",
        }
    }

    /// Number of elements for collections, characters for strings.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::BinaryRef(r) => {
                let mut obj = serde_json::Map::new();
                obj.insert(
                    BINARY_REF_KEY.to_string(),
                    serde_json::to_value(r).unwrap_or(serde_json::Value::Null),
                );
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Size in bytes of the compact JSON form.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(&self.to_json())
            .map(|bytes| bytes.len())
            .unwrap_or(0)
    }

    /// Bounded copy of this value, suitable for persistence and inspection.
    pub fn preview(&self, limits: &PreviewLimits) -> Value {
        self.preview_at(limits, 0)
    }

    fn preview_at(&self, limits: &PreviewLimits, depth: usize) -> Value {
        match self {
            Value::String(s) if s.chars().count() > limits.max_string_chars => {
                let head: String = s.chars().take(limits.max_string_chars).collect();
                Value::String(format!("{}...", head))
            }
            Value::List(items) => {
                if depth >= limits.max_depth {
                    return Value::String(format!("[list of {} items]", items.len()));
                }
                let mut out: Vec<Value> = items
                    .iter()
                    .take(limits.max_items)
                    .map(|v| v.preview_at(limits, depth + 1))
                    .collect();
                if items.len() > limits.max_items {
                    out.push(Value::String(format!(
                        "... {} more items",
                        items.len() - limits.max_items
                    )));
                }
                Value::List(out)
            }
            Value::Map(map) => {
                if depth >= limits.max_depth {
                    return Value::String(format!("{{map of {} keys}}", map.len()));
                }
                let mut out: BTreeMap<String, Value> = map
                    .iter()
                    .take(limits.max_items)
                    .map(|(k, v)| (k.clone(), v.preview_at(limits, depth + 1)))
                    .collect();
                if map.len() > limits.max_items {
                    out.insert(
                        "...".to_string(),
                        Value::String(format!("{} more keys", map.len() - limits.max_items)),
                    );
                }
                Value::Map(out)
            }
            other => other.clone(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::List(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(inner) = obj.get(BINARY_REF_KEY) {
                        if let Ok(r) = serde_json::from_value::<BinaryRef>(inner.clone()) {
                            return Value::BinaryRef(r);
                        }
                    }
                }
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// Non-finite floats have no JSON form and become `Null`.
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number((n as u64).into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(map: HashMap<String, Value>) -> Self {
        Value::Map(map.into_iter().collect())
    }
}

impl From<BinaryRef> for Value {
    fn from(r: BinaryRef) -> Self {
        Value::BinaryRef(r)
    }
}
