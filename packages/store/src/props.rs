//! # Block Properties
//!
//! The open property mapping carried by every block.
//!
//! Values are plain JSON-like data stored as [`Any`] inside the block entry,
//! or replicated text stored as a nested `Y.Text`. In JSON form replicated
//! text is written as `{"$text": "..."}` so that it survives a round trip
//! through configuration files and mutation scripts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use yrs::{Any, GetString, Out, ReadTxn};

/// JSON key marking a replicated text value.
pub const TEXT_MARKER: &str = "$text";

/// Property name → value
pub type Props = BTreeMap<String, PropValue>;

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    String(String),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
    /// Collaborative text (nested replicated text in the substrate)
    Text(String),
}

impl PropValue {
    /// Build a replicated text value
    pub fn text(content: impl Into<String>) -> Self {
        PropValue::Text(content.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) | PropValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Number(n) => Some(*n),
            PropValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, PropValue::Text(_))
    }

    /// Convert a plain value into the substrate's `Any`.
    ///
    /// Replicated text has no `Any` form; callers insert it as a text
    /// prelim instead. Here it degrades to a plain string.
    pub fn to_any(&self) -> Any {
        match self {
            PropValue::Null => Any::Null,
            PropValue::Bool(b) => Any::Bool(*b),
            PropValue::Int(i) => Any::BigInt(*i),
            PropValue::Number(n) => Any::Number(*n),
            PropValue::String(s) | PropValue::Text(s) => Any::String(Arc::from(s.as_str())),
            PropValue::List(items) => {
                let items: Vec<Any> = items.iter().map(PropValue::to_any).collect();
                Any::Array(items.into())
            }
            PropValue::Map(entries) => {
                let entries: HashMap<String, Any> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_any()))
                    .collect();
                Any::Map(Arc::new(entries))
            }
        }
    }

    pub fn from_any(any: &Any) -> Self {
        match any {
            Any::Null | Any::Undefined => PropValue::Null,
            Any::Bool(b) => PropValue::Bool(*b),
            Any::Number(n) => PropValue::Number(*n),
            Any::BigInt(i) => PropValue::Int(*i),
            Any::String(s) => PropValue::String(s.to_string()),
            Any::Buffer(bytes) => {
                PropValue::List(bytes.iter().map(|b| PropValue::Int(*b as i64)).collect())
            }
            Any::Array(items) => PropValue::List(items.iter().map(PropValue::from_any).collect()),
            Any::Map(entries) => PropValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), PropValue::from_any(v)))
                    .collect(),
            ),
        }
    }

    /// Read a value stored in a block entry
    pub fn from_out<T: ReadTxn>(txn: &T, out: Out) -> Self {
        match out {
            Out::Any(any) => PropValue::from_any(&any),
            Out::YText(text) => PropValue::Text(text.get_string(txn)),
            other => {
                tracing::warn!("unsupported nested property value: {:?}", other);
                PropValue::Null
            }
        }
    }
}

impl From<JsonValue> for PropValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => PropValue::Null,
            JsonValue::Bool(b) => PropValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => PropValue::Int(i),
                None => PropValue::Number(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => PropValue::String(s),
            JsonValue::Array(items) => PropValue::List(items.into_iter().map(PropValue::from).collect()),
            JsonValue::Object(mut entries) => {
                if entries.len() == 1 {
                    if let Some(JsonValue::String(text)) = entries.remove(TEXT_MARKER) {
                        return PropValue::Text(text);
                    }
                }
                PropValue::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, PropValue::from(v)))
                        .collect(),
                )
            }
        }
    }
}

impl From<PropValue> for JsonValue {
    fn from(value: PropValue) -> Self {
        match value {
            PropValue::Null => JsonValue::Null,
            PropValue::Bool(b) => JsonValue::Bool(b),
            PropValue::Int(i) => JsonValue::from(i),
            PropValue::Number(n) => JsonValue::from(n),
            PropValue::String(s) => JsonValue::String(s),
            PropValue::List(items) => JsonValue::Array(items.into_iter().map(JsonValue::from).collect()),
            PropValue::Map(entries) => JsonValue::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, JsonValue::from(v)))
                    .collect(),
            ),
            PropValue::Text(text) => {
                let mut marker = serde_json::Map::new();
                marker.insert(TEXT_MARKER.to_string(), JsonValue::String(text));
                JsonValue::Object(marker)
            }
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::String(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::String(s)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

impl From<i64> for PropValue {
    fn from(i: i64) -> Self {
        PropValue::Int(i)
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        PropValue::Number(n)
    }
}
