//! Change descriptions delivered to observers.

use crate::value::{BranchId, Value};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// One segment of a sequence change.
///
/// Applying the segments of a delta in order to the previous content
/// yields the new content.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delta<T> {
    Insert(T),
    Delete(usize),
    Retain(usize),
}

impl<T> Delta<T> {
    /// Map the inserted content, keeping the shape.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Delta<U> {
        match self {
            Delta::Insert(v) => Delta::Insert(f(v)),
            Delta::Delete(n) => Delta::Delete(n),
            Delta::Retain(n) => Delta::Retain(n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MapAction {
    Add,
    Update,
    Delete,
}

/// Change of one map key.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapChange {
    pub name: String,
    pub action: MapAction,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
}

/// Old and new value of a single field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChange<T> {
    pub old_value: Option<T>,
    pub new_value: Option<T>,
}

/// What changed in one shared type during a transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum BranchChange {
    Text(Vec<Delta<String>>),
    Array {
        delta: Vec<Delta<Vec<Value>>>,
        /// Elements deleted by the transaction, in document order.
        removed: Vec<Value>,
    },
    Map(Vec<MapChange>),
}

/// A change event for one shared type.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchEvent {
    pub target: BranchId,
    /// Ancestors of the target, nearest first.
    pub path: Vec<BranchId>,
    pub change: BranchChange,
}

impl BranchEvent {
    /// Whether this event happened in `branch` or below it.
    pub fn is_within(&self, branch: &BranchId) -> bool {
        &self.target == branch || self.path.contains(branch)
    }
}

/// Accumulates delta segments, merging neighbours of the same kind.
pub(crate) struct DeltaBuilder<T> {
    segments: Vec<Delta<T>>,
}

impl<T: Default> DeltaBuilder<T> {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn retain(&mut self, n: usize) {
        if let Some(Delta::Retain(count)) = self.segments.last_mut() {
            *count += n;
        } else {
            self.segments.push(Delta::Retain(n));
        }
    }

    pub fn delete(&mut self, n: usize) {
        if let Some(Delta::Delete(count)) = self.segments.last_mut() {
            *count += n;
        } else {
            self.segments.push(Delta::Delete(n));
        }
    }

    pub fn insert<E>(&mut self, item: E)
    where
        T: Extend<E>,
    {
        if let Some(Delta::Insert(content)) = self.segments.last_mut() {
            content.extend(std::iter::once(item));
        } else {
            let mut content = T::default();
            content.extend(std::iter::once(item));
            self.segments.push(Delta::Insert(content));
        }
    }

    /// Finish, dropping a trailing retain.
    pub fn finish(mut self) -> Vec<Delta<T>> {
        if let Some(Delta::Retain(_)) = self.segments.last() {
            self.segments.pop();
        }
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_builder_merges() {
        let mut builder: DeltaBuilder<String> = DeltaBuilder::new();
        builder.retain(1);
        builder.retain(2);
        builder.insert('a');
        builder.insert('b');
        builder.delete(1);
        builder.delete(1);
        builder.retain(4);

        assert_eq!(
            builder.finish(),
            vec![
                Delta::Retain(3),
                Delta::Insert("ab".to_string()),
                Delta::Delete(2)
            ]
        );
    }

    #[test]
    fn test_only_retains_is_empty() {
        let mut builder: DeltaBuilder<Vec<u8>> = DeltaBuilder::new();
        builder.retain(5);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn test_delta_serialization() {
        let delta: Vec<Delta<String>> = vec![Delta::Retain(2), Delta::Insert("x".into())];
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json, serde_json::json!([{"retain": 2}, {"insert": "x"}]));
    }
}
