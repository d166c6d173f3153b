//! RGA - Replicated Growable Array for ordered sequences.
//!
//! Every element remembers the element it was inserted after (its origin).
//! The sequence order is a depth-first walk of that origin tree where
//! siblings are visited newest first, so concurrent inserts at the same
//! place resolve identically on every replica.
//!
//! Deleted elements stay in the tree as tombstones and keep their value:
//! later inserts may still name them as origin, and undo re-creates
//! deleted content right after them.

use crate::id::ItemId;
use std::collections::HashMap;

/// A node in the RGA tree.
#[derive(Clone, Debug, PartialEq)]
pub struct RgaNode<T> {
    /// The unique ID of this node.
    pub id: ItemId,
    /// The ID of the element this was inserted after.
    pub origin: ItemId,
    /// The stored value; kept on tombstones.
    pub value: T,
    /// Whether this node is deleted (tombstone).
    pub deleted: bool,
}

/// Result of integrating a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrate {
    /// The node is now part of the sequence.
    Integrated,
    /// A node with this id already exists; nothing changed.
    Duplicate,
    /// The origin is unknown; the caller must retry once it arrives.
    MissingOrigin,
}

/// Replicated Growable Array - an ordered list CRDT.
#[derive(Clone, Debug)]
pub struct Rga<T> {
    /// All nodes indexed by their ID.
    nodes: HashMap<ItemId, RgaNode<T>>,
    /// Children of each node, sorted newest first.
    children: HashMap<ItemId, Vec<ItemId>>,
    /// Number of non-deleted nodes.
    visible: usize,
}

impl<T> Rga<T> {
    pub fn new() -> Self {
        let mut children = HashMap::new();
        children.insert(ItemId::ROOT, Vec::new());
        Self {
            nodes: HashMap::new(),
            children,
            visible: 0,
        }
    }

    /// Number of visible elements.
    pub fn len(&self) -> usize {
        self.visible
    }

    pub fn is_empty(&self) -> bool {
        self.visible == 0
    }

    /// Whether a node (live or tombstone) exists.
    pub fn contains(&self, id: &ItemId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&RgaNode<T>> {
        self.nodes.get(id)
    }

    pub fn is_visible(&self, id: &ItemId) -> bool {
        self.nodes.get(id).map(|n| !n.deleted).unwrap_or(false)
    }

    /// The origin a new element at visible `index` must be inserted after.
    ///
    /// Returns `None` when `index` is past the end.
    pub fn origin_for(&self, index: usize) -> Option<ItemId> {
        if index > self.visible {
            return None;
        }
        if index == 0 {
            return Some(ItemId::ROOT);
        }
        self.id_at(index - 1)
    }

    /// Integrate a node, keeping sibling order newest first.
    pub fn integrate(&mut self, id: ItemId, origin: ItemId, value: T) -> Integrate {
        if self.nodes.contains_key(&id) {
            return Integrate::Duplicate;
        }
        if !origin.is_root() && !self.nodes.contains_key(&origin) {
            return Integrate::MissingOrigin;
        }

        let siblings = self.children.entry(origin).or_default();
        let pos = siblings
            .iter()
            .position(|c| c < &id)
            .unwrap_or(siblings.len());
        siblings.insert(pos, id);
        self.children.entry(id).or_default();

        self.nodes.insert(
            id,
            RgaNode {
                id,
                origin,
                value,
                deleted: false,
            },
        );
        self.visible += 1;
        Integrate::Integrated
    }

    /// Tombstone a node. Returns true if it was visible before.
    pub fn delete(&mut self, id: &ItemId) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if !node.deleted => {
                node.deleted = true;
                self.visible -= 1;
                true
            }
            _ => false,
        }
    }

    /// Revive a tombstone. Used to roll back a local delete that never left
    /// the replica.
    pub fn restore(&mut self, id: &ItemId) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.deleted => {
                node.deleted = false;
                self.visible += 1;
                true
            }
            _ => false,
        }
    }

    /// Remove a childless node entirely. Used to roll back a local insert
    /// that never left the replica.
    pub fn remove(&mut self, id: &ItemId) -> Option<RgaNode<T>> {
        if self.children.get(id).map(|c| !c.is_empty()).unwrap_or(false) {
            return None;
        }
        let node = self.nodes.remove(id)?;
        self.children.remove(id);
        if let Some(siblings) = self.children.get_mut(&node.origin) {
            siblings.retain(|c| c != id);
        }
        if !node.deleted {
            self.visible -= 1;
        }
        Some(node)
    }

    /// Iterate over all nodes in sequence order, tombstones included.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &RgaNode<T>> + '_ {
        RgaIter {
            rga: self,
            stack: self
                .children
                .get(&ItemId::ROOT)
                .map(|c| c.iter().rev().copied().collect())
                .unwrap_or_default(),
        }
    }

    /// Iterate over visible values in order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter_nodes().filter(|n| !n.deleted).map(|n| &n.value)
    }

    /// Iterate over visible IDs in order.
    pub fn visible_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.iter_nodes().filter(|n| !n.deleted).map(|n| n.id)
    }

    /// ID of the visible element at `index`.
    pub fn id_at(&self, index: usize) -> Option<ItemId> {
        self.visible_ids().nth(index)
    }

    /// Visible index of an ID.
    pub fn index_of(&self, id: &ItemId) -> Option<usize> {
        self.visible_ids().position(|i| &i == id)
    }

    /// IDs of the visible elements in `[start, start + len)`.
    pub fn range_ids(&self, start: usize, len: usize) -> Vec<ItemId> {
        self.visible_ids().skip(start).take(len).collect()
    }
}

impl<T: Clone> Rga<T> {
    /// Visible values as a Vec.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> Default for Rga<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first walk of the origin tree.
struct RgaIter<'a, T> {
    rga: &'a Rga<T>,
    stack: Vec<ItemId>,
}

impl<'a, T> Iterator for RgaIter<'a, T> {
    type Item = &'a RgaNode<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        if let Some(children) = self.rga.children.get(&id) {
            self.stack.extend(children.iter().rev().copied());
        }
        self.rga.nodes.get(&id)
    }
}
