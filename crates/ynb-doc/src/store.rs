//! Document storage: every shared type of a document, by id.

use crate::error::{DocError, Result};
use crate::shared::{SharedArray, SharedMap, SharedText};
use crate::update::{Content, Op};
use crate::value::{BranchId, BranchKind, Prelim, Slot, Value};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use ynb_core::{ClientId, ItemId, LamportClock, LwwMap, Rga};

pub(crate) enum BranchContent {
    Text(Rga<char>),
    Array(Rga<Slot>),
    Map(LwwMap<Slot>),
}

impl BranchContent {
    pub fn new(kind: BranchKind) -> Self {
        match kind {
            BranchKind::Text => BranchContent::Text(Rga::new()),
            BranchKind::Array => BranchContent::Array(Rga::new()),
            BranchKind::Map => BranchContent::Map(LwwMap::new()),
        }
    }

    pub fn kind(&self) -> BranchKind {
        match self {
            BranchContent::Text(_) => BranchKind::Text,
            BranchContent::Array(_) => BranchKind::Array,
            BranchContent::Map(_) => BranchKind::Map,
        }
    }

    pub fn seq_len(&self) -> usize {
        match self {
            BranchContent::Text(rga) => rga.len(),
            BranchContent::Array(rga) => rga.len(),
            BranchContent::Map(_) => 0,
        }
    }

    pub fn seq_contains(&self, id: &ItemId) -> bool {
        match self {
            BranchContent::Text(rga) => rga.contains(id),
            BranchContent::Array(rga) => rga.contains(id),
            BranchContent::Map(_) => false,
        }
    }

    pub fn seq_is_visible(&self, id: &ItemId) -> bool {
        match self {
            BranchContent::Text(rga) => rga.is_visible(id),
            BranchContent::Array(rga) => rga.is_visible(id),
            BranchContent::Map(_) => false,
        }
    }

    pub fn seq_visible_ids(&self) -> Vec<ItemId> {
        match self {
            BranchContent::Text(rga) => rga.visible_ids().collect(),
            BranchContent::Array(rga) => rga.visible_ids().collect(),
            BranchContent::Map(_) => Vec::new(),
        }
    }

    pub fn seq_range_ids(&self, start: usize, len: usize) -> Vec<ItemId> {
        match self {
            BranchContent::Text(rga) => rga.range_ids(start, len),
            BranchContent::Array(rga) => rga.range_ids(start, len),
            BranchContent::Map(_) => Vec::new(),
        }
    }

    pub fn seq_origin_for(&self, index: usize) -> Option<ItemId> {
        match self {
            BranchContent::Text(rga) => rga.origin_for(index),
            BranchContent::Array(rga) => rga.origin_for(index),
            BranchContent::Map(_) => None,
        }
    }

    pub fn seq_delete(&mut self, id: &ItemId) -> bool {
        match self {
            BranchContent::Text(rga) => rga.delete(id),
            BranchContent::Array(rga) => rga.delete(id),
            BranchContent::Map(_) => false,
        }
    }

    pub fn seq_restore(&mut self, id: &ItemId) -> bool {
        match self {
            BranchContent::Text(rga) => rga.restore(id),
            BranchContent::Array(rga) => rga.restore(id),
            BranchContent::Map(_) => false,
        }
    }

    pub fn seq_remove(&mut self, id: &ItemId) -> bool {
        match self {
            BranchContent::Text(rga) => rga.remove(id).is_some(),
            BranchContent::Array(rga) => rga.remove(id).is_some(),
            BranchContent::Map(_) => false,
        }
    }
}

pub(crate) struct Branch {
    pub parent: Option<BranchId>,
    /// Set once the element or map entry holding this type is removed.
    pub deleted: bool,
    pub content: BranchContent,
}

/// All shared types of one document replica.
pub struct DocStore {
    pub(crate) clock: LamportClock,
    pub(crate) branches: HashMap<BranchId, Branch>,
    /// Remote operations waiting for a dependency.
    pub(crate) pending: Vec<Op>,
    /// Copies made by undo/redo of deleted elements, keyed by the original.
    pub(crate) redone: HashMap<(BranchId, ItemId), (BranchId, ItemId)>,
}

fn mismatch(expected: BranchKind, found: BranchKind) -> DocError {
    DocError::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

impl DocStore {
    pub(crate) fn new(client: ClientId) -> Self {
        Self {
            clock: LamportClock::new(client),
            branches: HashMap::new(),
            pending: Vec::new(),
            redone: HashMap::new(),
        }
    }

    pub(crate) fn client_id(&self) -> ClientId {
        self.clock.client()
    }

    pub(crate) fn branch(&self, id: &BranchId) -> Result<&Branch> {
        self.branches
            .get(id)
            .ok_or_else(|| DocError::UnknownBranch(id.to_string()))
    }

    pub(crate) fn branch_mut(&mut self, id: &BranchId) -> Result<&mut Branch> {
        self.branches
            .get_mut(id)
            .ok_or_else(|| DocError::UnknownBranch(id.to_string()))
    }

    pub(crate) fn contains(&self, id: &BranchId) -> bool {
        self.branches.contains_key(id)
    }

    /// Whether the type exists and has not been removed from its parent.
    pub(crate) fn is_alive(&self, id: &BranchId) -> bool {
        self.branches.get(id).map(|b| !b.deleted).unwrap_or(false)
    }

    /// The latest copy of an element that undo or redo re-created.
    pub(crate) fn follow_redone(&self, branch: &BranchId, id: ItemId) -> (BranchId, ItemId) {
        let mut current = (branch.clone(), id);
        while let Some(next) = self.redone.get(&current) {
            current = next.clone();
        }
        current
    }

    /// The latest copy of a nested type whose element was re-created.
    pub(crate) fn follow_branch(&self, branch: &BranchId) -> BranchId {
        let mut current = branch.clone();
        loop {
            let BranchId::Item(id) = current else {
                return current;
            };
            let Some(parent) = self.branches.get(&current).and_then(|b| b.parent.clone()) else {
                return current;
            };
            match self.redone.get(&(parent, id)) {
                Some((_, copy)) => current = BranchId::Item(*copy),
                None => return current,
            }
        }
    }

    /// Create a named top-level type on first use. Returns true if it was
    /// created now.
    pub(crate) fn ensure_root(&mut self, id: &BranchId, kind: BranchKind) -> Result<bool> {
        if let Some(branch) = self.branches.get(id) {
            let found = branch.content.kind();
            return if found == kind {
                Ok(false)
            } else {
                Err(mismatch(kind, found))
            };
        }
        match id {
            BranchId::Root(_) => {
                self.branches.insert(
                    id.clone(),
                    Branch {
                        parent: None,
                        deleted: false,
                        content: BranchContent::new(kind),
                    },
                );
                Ok(true)
            }
            BranchId::Item(_) => Err(DocError::UnknownBranch(id.to_string())),
        }
    }

    /// Create a nested type. Returns false if it already exists.
    pub(crate) fn create_branch(&mut self, id: BranchId, kind: BranchKind, parent: BranchId) -> bool {
        if self.branches.contains_key(&id) {
            return false;
        }
        self.branches.insert(
            id,
            Branch {
                parent: Some(parent),
                deleted: false,
                content: BranchContent::new(kind),
            },
        );
        true
    }

    pub(crate) fn text(&self, id: &BranchId) -> Result<&Rga<char>> {
        match &self.branch(id)?.content {
            BranchContent::Text(rga) => Ok(rga),
            other => Err(mismatch(BranchKind::Text, other.kind())),
        }
    }

    pub(crate) fn text_mut(&mut self, id: &BranchId) -> Result<&mut Rga<char>> {
        match &mut self.branch_mut(id)?.content {
            BranchContent::Text(rga) => Ok(rga),
            other => Err(mismatch(BranchKind::Text, other.kind())),
        }
    }

    pub(crate) fn array(&self, id: &BranchId) -> Result<&Rga<Slot>> {
        match &self.branch(id)?.content {
            BranchContent::Array(rga) => Ok(rga),
            other => Err(mismatch(BranchKind::Array, other.kind())),
        }
    }

    pub(crate) fn array_mut(&mut self, id: &BranchId) -> Result<&mut Rga<Slot>> {
        match &mut self.branch_mut(id)?.content {
            BranchContent::Array(rga) => Ok(rga),
            other => Err(mismatch(BranchKind::Array, other.kind())),
        }
    }

    pub(crate) fn map(&self, id: &BranchId) -> Result<&LwwMap<Slot>> {
        match &self.branch(id)?.content {
            BranchContent::Map(map) => Ok(map),
            other => Err(mismatch(BranchKind::Map, other.kind())),
        }
    }

    pub(crate) fn map_mut(&mut self, id: &BranchId) -> Result<&mut LwwMap<Slot>> {
        match &mut self.branch_mut(id)?.content {
            BranchContent::Map(map) => Ok(map),
            other => Err(mismatch(BranchKind::Map, other.kind())),
        }
    }

    /// Ancestors of a type, nearest first.
    pub(crate) fn ancestors(&self, id: &BranchId) -> Vec<BranchId> {
        let mut path = Vec::new();
        let mut current = self.branches.get(id).and_then(|b| b.parent.clone());
        while let Some(parent) = current {
            current = self.branches.get(&parent).and_then(|b| b.parent.clone());
            path.push(parent);
        }
        path
    }

    /// Shared types reachable from `id` through live content, `id` first.
    pub(crate) fn subtree(&self, id: &BranchId) -> Vec<BranchId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(next) = stack.pop() {
            if let Some(branch) = self.branches.get(&next) {
                match &branch.content {
                    BranchContent::Array(rga) => {
                        stack.extend(rga.iter().filter_map(|slot| match slot {
                            Slot::Branch(child) => Some(child.clone()),
                            Slot::Json(_) => None,
                        }));
                    }
                    BranchContent::Map(map) => {
                        stack.extend(map.iter().filter_map(|(_, slot)| match slot {
                            Slot::Branch(child) => Some(child.clone()),
                            Slot::Json(_) => None,
                        }));
                    }
                    BranchContent::Text(_) => {}
                }
                out.push(next);
            }
        }
        out
    }

    pub(crate) fn slot_value(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Json(v) => Value::Json(v.clone()),
            Slot::Branch(id) => match self.branches.get(id).map(|b| b.content.kind()) {
                Some(BranchKind::Text) => Value::Text(SharedText::new(id.clone())),
                Some(BranchKind::Array) => Value::Array(SharedArray::new(id.clone())),
                Some(BranchKind::Map) => Value::Map(SharedMap::new(id.clone())),
                None => Value::Json(JsonValue::Null),
            },
        }
    }

    pub(crate) fn slot_json(&self, slot: &Slot) -> JsonValue {
        match slot {
            Slot::Json(v) => v.clone(),
            Slot::Branch(id) => self.branch_json(id),
        }
    }

    /// Plain JSON rendering of a shared type. Works on removed types too.
    pub(crate) fn branch_json(&self, id: &BranchId) -> JsonValue {
        match self.branches.get(id).map(|b| &b.content) {
            Some(BranchContent::Text(rga)) => JsonValue::String(rga.iter().collect()),
            Some(BranchContent::Array(rga)) => {
                JsonValue::Array(rga.iter().map(|s| self.slot_json(s)).collect())
            }
            Some(BranchContent::Map(map)) => JsonValue::Object(
                map.iter()
                    .map(|(k, s)| (k.to_string(), self.slot_json(s)))
                    .collect(),
            ),
            None => JsonValue::Null,
        }
    }

    pub(crate) fn slot_prelim(&self, slot: &Slot) -> Prelim {
        match slot {
            Slot::Json(v) => Prelim::Json(v.clone()),
            Slot::Branch(id) => self.branch_prelim(id),
        }
    }

    /// Deep copy of a shared type's visible content.
    pub(crate) fn branch_prelim(&self, id: &BranchId) -> Prelim {
        match self.branches.get(id).map(|b| &b.content) {
            Some(BranchContent::Text(rga)) => Prelim::Text(rga.iter().collect()),
            Some(BranchContent::Array(rga)) => {
                Prelim::Array(rga.iter().map(|s| self.slot_prelim(s)).collect())
            }
            Some(BranchContent::Map(map)) => Prelim::Map(
                map.iter()
                    .map(|(k, s)| (k.to_string(), self.slot_prelim(s)))
                    .collect(),
            ),
            None => Prelim::Json(JsonValue::Null),
        }
    }

    fn slot_content(&self, slot: &Slot) -> Option<Content> {
        match slot {
            Slot::Json(v) => Some(Content::Json(v.clone())),
            Slot::Branch(id) => self
                .branches
                .get(id)
                .map(|b| Content::Branch(b.content.kind())),
        }
    }

    /// Operations that rebuild this replica's full state, tombstones included.
    pub(crate) fn encode_state(&self) -> Vec<Op> {
        let mut roots: Vec<&BranchId> = self
            .branches
            .keys()
            .filter(|id| matches!(id, BranchId::Root(_)))
            .collect();
        roots.sort();

        let mut ops = Vec::new();
        for root in roots {
            self.encode_branch(root, &mut ops);
        }
        ops
    }

    fn encode_branch(&self, id: &BranchId, ops: &mut Vec<Op>) {
        let Some(branch) = self.branches.get(id) else {
            return;
        };
        match &branch.content {
            BranchContent::Text(rga) => {
                let mut deleted = Vec::new();
                for node in rga.iter_nodes() {
                    if node.deleted {
                        deleted.push(node.id);
                    }
                    if let Some(Op::InsertText {
                        branch: run_branch,
                        id: run_id,
                        text,
                        ..
                    }) = ops.last_mut()
                    {
                        let run_len = text.chars().count() as u64;
                        let last = ItemId::new(run_id.client, run_id.clock + run_len - 1);
                        if *run_branch == *id
                            && node.origin == last
                            && node.id == ItemId::new(last.client, last.clock + 1)
                        {
                            text.push(node.value);
                            continue;
                        }
                    }
                    ops.push(Op::InsertText {
                        branch: id.clone(),
                        id: node.id,
                        origin: node.origin,
                        text: node.value.to_string(),
                    });
                }
                ops.extend(deleted.into_iter().map(|item| Op::Delete {
                    branch: id.clone(),
                    id: item,
                }));
            }
            BranchContent::Array(rga) => {
                let mut deleted = Vec::new();
                for node in rga.iter_nodes() {
                    if node.deleted {
                        deleted.push(node.id);
                    }
                    let Some(content) = self.slot_content(&node.value) else {
                        continue;
                    };
                    ops.push(Op::Insert {
                        branch: id.clone(),
                        id: node.id,
                        origin: node.origin,
                        content,
                    });
                    if let Slot::Branch(child) = &node.value {
                        self.encode_branch(child, ops);
                    }
                }
                ops.extend(deleted.into_iter().map(|item| Op::Delete {
                    branch: id.clone(),
                    id: item,
                }));
            }
            BranchContent::Map(map) => {
                for (key, entry) in map.entries() {
                    let content = match &entry.value {
                        Some(slot) => match self.slot_content(slot) {
                            Some(content) => Some(content),
                            None => continue,
                        },
                        None => None,
                    };
                    ops.push(Op::MapSet {
                        branch: id.clone(),
                        key: key.to_string(),
                        stamp: entry.stamp,
                        content,
                    });
                    if let Some(Slot::Branch(child)) = &entry.value {
                        self.encode_branch(child, ops);
                    }
                }
            }
        }
    }
}
