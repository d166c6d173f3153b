//! Replication messages.
//!
//! An [`Update`] is an ordered list of operations. Operations are
//! idempotent and commute once their dependencies are present, so updates
//! may be delivered more than once and in any order.

use crate::error::Result;
use crate::value::{BranchId, BranchKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use ynb_core::ItemId;

/// Content carried by an insert or a map write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    Json(JsonValue),
    /// A new, empty shared type named after the operation's id.
    Branch(BranchKind),
}

/// A single replicated operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// A run of characters. Character `k` has clock `id.clock + k` and
    /// follows character `k - 1`; the first follows `origin`.
    InsertText {
        branch: BranchId,
        id: ItemId,
        origin: ItemId,
        text: String,
    },
    /// One array element placed after `origin`.
    Insert {
        branch: BranchId,
        id: ItemId,
        origin: ItemId,
        content: Content,
    },
    /// Tombstone a text character or array element.
    Delete { branch: BranchId, id: ItemId },
    /// Write (or remove, when `content` is `None`) a map key.
    MapSet {
        branch: BranchId,
        key: String,
        stamp: ItemId,
        content: Option<Content>,
    },
}

impl Op {
    /// The shared type this operation applies to.
    pub fn branch(&self) -> &BranchId {
        match self {
            Op::InsertText { branch, .. }
            | Op::Insert { branch, .. }
            | Op::Delete { branch, .. }
            | Op::MapSet { branch, .. } => branch,
        }
    }
}

/// A batch of operations produced by one transaction, or a full state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub ops: Vec<Op>,
}

impl Update {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Serialize to bytes for transport.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Concatenate several updates into one.
    pub fn merge(updates: impl IntoIterator<Item = Update>) -> Self {
        Self {
            ops: updates.into_iter().flat_map(|u| u.ops).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocError;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let update = Update::new(vec![
            Op::InsertText {
                branch: BranchId::root("source"),
                id: ItemId::new(1, 1),
                origin: ItemId::ROOT,
                text: "hi".to_string(),
            },
            Op::MapSet {
                branch: BranchId::Item(ItemId::new(1, 5)),
                key: "execution_count".to_string(),
                stamp: ItemId::new(1, 6),
                content: Some(Content::Json(json!(3))),
            },
        ]);

        let bytes = update.encode().unwrap();
        assert_eq!(Update::decode(&bytes).unwrap(), update);
    }

    #[test]
    fn test_decode_garbage() {
        let err = Update::decode(b"not json").unwrap_err();
        assert!(matches!(err, DocError::Serialization(_)));
    }

    #[test]
    fn test_merge_keeps_order() {
        let a = Update::new(vec![Op::Delete {
            branch: BranchId::root("cells"),
            id: ItemId::new(1, 1),
        }]);
        let b = Update::new(vec![Op::Delete {
            branch: BranchId::root("cells"),
            id: ItemId::new(1, 2),
        }]);

        let merged = Update::merge([a, b]);
        assert_eq!(merged.ops.len(), 2);
        assert_eq!(merged.ops[1].branch(), &BranchId::root("cells"));
    }
}
