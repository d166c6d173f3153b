//! Values stored in shared types.

use crate::shared::{SharedArray, SharedMap, SharedText};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use ynb_core::ItemId;

/// Identifier of a shared type inside a document.
///
/// Top-level types are named; nested types are named by the item that
/// created them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BranchId {
    Root(String),
    Item(ItemId),
}

impl BranchId {
    pub fn root(name: impl Into<String>) -> Self {
        BranchId::Root(name.into())
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchId::Root(name) => write!(f, "root:{}", name),
            BranchId::Item(id) => write!(f, "item:{}", id),
        }
    }
}

/// The kind of a shared type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    Text,
    Array,
    Map,
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchKind::Text => "text",
            BranchKind::Array => "array",
            BranchKind::Map => "map",
        };
        f.write_str(name)
    }
}

/// What an array element or a map entry holds internally.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Slot {
    Json(JsonValue),
    Branch(BranchId),
}

/// A value read out of a shared array or map.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Json(JsonValue),
    Text(SharedText),
    Array(SharedArray),
    Map(SharedMap),
}

impl Value {
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<JsonValue> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&SharedText> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&SharedArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&SharedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The shared type this value refers to, if any.
    pub fn branch(&self) -> Option<&BranchId> {
        match self {
            Value::Json(_) => None,
            Value::Text(t) => Some(t.branch()),
            Value::Array(a) => Some(a.branch()),
            Value::Map(m) => Some(m.branch()),
        }
    }
}

/// Content to be written into a document.
///
/// Nested shared types are described by value and become real shared
/// types when integrated.
#[derive(Clone, Debug, PartialEq)]
pub enum Prelim {
    Json(JsonValue),
    Text(String),
    Array(Vec<Prelim>),
    Map(Vec<(String, Prelim)>),
}

impl Prelim {
    pub fn kind(&self) -> Option<BranchKind> {
        match self {
            Prelim::Json(_) => None,
            Prelim::Text(_) => Some(BranchKind::Text),
            Prelim::Array(_) => Some(BranchKind::Array),
            Prelim::Map(_) => Some(BranchKind::Map),
        }
    }

    /// Plain JSON rendering of this content.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Prelim::Json(v) => v.clone(),
            Prelim::Text(s) => JsonValue::String(s.clone()),
            Prelim::Array(items) => JsonValue::Array(items.iter().map(Prelim::to_json).collect()),
            Prelim::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<JsonValue> for Prelim {
    fn from(value: JsonValue) -> Self {
        Prelim::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_branch_id_display() {
        assert_eq!(BranchId::root("cells").to_string(), "root:cells");
        assert_eq!(BranchId::Item(ItemId::new(3, 9)).to_string(), "item:3@9");
    }

    #[test]
    fn test_prelim_to_json() {
        let prelim = Prelim::Map(vec![
            ("source".to_string(), Prelim::Text("x = 1".to_string())),
            ("outputs".to_string(), Prelim::Array(vec![json!({"a": 1}).into()])),
        ]);

        assert_eq!(prelim.kind(), Some(BranchKind::Map));
        assert_eq!(
            prelim.to_json(),
            json!({"source": "x = 1", "outputs": [{"a": 1}]})
        );
    }
}
