//! Transactions over a document.
//!
//! Every mutation runs inside a [`TransactionMut`]. The transaction logs
//! what it did so that it can either be committed (producing events, an
//! update for peers and undo bookkeeping) or rolled back without a trace.

use crate::doc::Origin;
use crate::error::{DocError, Result};
use crate::event::{BranchChange, BranchEvent, DeltaBuilder, MapAction, MapChange};
use crate::store::{BranchContent, DocStore};
use crate::undo::StackItem;
use crate::update::{Content, Op, Update};
use crate::value::{BranchId, BranchKind, Prelim, Slot, Value};
use parking_lot::MutexGuard;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use ynb_core::{ClientId, Integrate, ItemId, LwwEntry, SetOutcome};

/// Read access to a document.
pub trait ReadTxn {
    #[doc(hidden)]
    fn store(&self) -> &DocStore;

    fn client_id(&self) -> ClientId {
        self.store().client_id()
    }
}

/// A read-only transaction.
pub struct Transaction<'doc> {
    pub(crate) store: MutexGuard<'doc, DocStore>,
}

impl ReadTxn for Transaction<'_> {
    fn store(&self) -> &DocStore {
        &self.store
    }
}

enum Revert {
    Integrated {
        branch: BranchId,
        id: ItemId,
    },
    Deleted {
        branch: BranchId,
        id: ItemId,
    },
    MapEntry {
        branch: BranchId,
        key: String,
        previous: Option<LwwEntry<Slot>>,
    },
    Created(BranchId),
    Tombstoned(Vec<BranchId>),
    Redone((BranchId, ItemId)),
}

#[derive(Default)]
struct TxnLog {
    ops: Vec<Op>,
    revert: Vec<Revert>,
    /// Visible ids of each touched sequence before its first change.
    seq_before: HashMap<BranchId, HashSet<ItemId>>,
    /// Value of each touched map key before its first change.
    map_before: HashMap<BranchId, BTreeMap<String, Option<Slot>>>,
    /// Nested types created by this transaction.
    created: HashSet<BranchId>,
    inserted: Vec<(BranchId, ItemId)>,
    deleted: Vec<(BranchId, ItemId)>,
    pending_before: Option<Vec<Op>>,
}

/// An item inserted or deleted by a committed transaction.
#[derive(Clone, Debug)]
pub(crate) struct TrackedItem {
    pub branch: BranchId,
    pub id: ItemId,
    pub path: Vec<BranchId>,
}

/// A map key changed by a committed transaction.
#[derive(Clone, Debug)]
pub(crate) struct TrackedKey {
    pub branch: BranchId,
    pub key: String,
    pub old: Option<Slot>,
    pub path: Vec<BranchId>,
}

/// Everything observers and undo managers need to know about a commit.
pub(crate) struct CommitRecord {
    pub origin: Origin,
    pub events: Vec<BranchEvent>,
    pub update: Option<Update>,
    pub inserted: Vec<TrackedItem>,
    pub deleted: Vec<TrackedItem>,
    pub map_changes: Vec<TrackedKey>,
}

/// A read-write transaction.
pub struct TransactionMut<'doc> {
    store: &'doc mut DocStore,
    origin: Origin,
    start_clock: u64,
    log: TxnLog,
}

impl ReadTxn for TransactionMut<'_> {
    fn store(&self) -> &DocStore {
        &*self.store
    }
}

impl<'doc> TransactionMut<'doc> {
    pub(crate) fn new(store: &'doc mut DocStore, origin: Origin) -> Self {
        let start_clock = store.clock.time();
        Self {
            store,
            origin,
            start_clock,
            log: TxnLog::default(),
        }
    }

    /// The origin this transaction was opened with.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    fn prepare(&mut self, branch: &BranchId, kind: BranchKind) -> Result<()> {
        if self.store.ensure_root(branch, kind)? {
            self.log.revert.push(Revert::Created(branch.clone()));
        }
        Ok(())
    }

    fn touch_seq(&mut self, branch: &BranchId) {
        if self.log.created.contains(branch) || self.log.seq_before.contains_key(branch) {
            return;
        }
        if let Ok(b) = self.store.branch(branch) {
            let ids = b.content.seq_visible_ids().into_iter().collect();
            self.log.seq_before.insert(branch.clone(), ids);
        }
    }

    fn touch_map(&mut self, branch: &BranchId, key: &str) {
        if self.log.created.contains(branch) {
            return;
        }
        let old = self
            .store
            .map(branch)
            .ok()
            .and_then(|m| m.get(key).cloned());
        self.log
            .map_before
            .entry(branch.clone())
            .or_default()
            .entry(key.to_string())
            .or_insert(old);
    }

    fn record_insert(&mut self, branch: &BranchId, id: ItemId) {
        self.log.revert.push(Revert::Integrated {
            branch: branch.clone(),
            id,
        });
        self.log.inserted.push((branch.clone(), id));
    }

    fn record_created(&mut self, id: &BranchId) {
        self.log.created.insert(id.clone());
        self.log.revert.push(Revert::Created(id.clone()));
    }

    /// Mark a removed nested type and everything below it as deleted.
    fn tombstone(&mut self, branch: &BranchId) {
        let ids: Vec<BranchId> = self
            .store
            .subtree(branch)
            .into_iter()
            .filter(|b| self.store.is_alive(b))
            .collect();
        for id in &ids {
            if let Ok(b) = self.store.branch_mut(id) {
                b.deleted = true;
            }
        }
        if !ids.is_empty() {
            self.log.revert.push(Revert::Tombstoned(ids));
        }
    }

    // ---- local edits -------------------------------------------------

    pub(crate) fn insert_text(&mut self, branch: &BranchId, index: usize, text: &str) -> Result<()> {
        self.prepare(branch, BranchKind::Text)?;
        let rga = self.store.text(branch)?;
        let origin = rga.origin_for(index).ok_or(DocError::IndexOutOfBounds {
            index,
            length: rga.len(),
        })?;
        self.insert_text_after(branch, origin, text)
    }

    fn insert_text_after(&mut self, branch: &BranchId, origin: ItemId, text: &str) -> Result<()> {
        self.touch_seq(branch);
        let mut prev = origin;
        let mut first = None;
        for ch in text.chars() {
            let id = self.store.clock.tick();
            self.store.text_mut(branch)?.integrate(id, prev, ch);
            self.record_insert(branch, id);
            first.get_or_insert(id);
            prev = id;
        }
        if let Some(id) = first {
            self.log.ops.push(Op::InsertText {
                branch: branch.clone(),
                id,
                origin,
                text: text.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn insert_values(&mut self, branch: &BranchId, index: usize, values: Vec<Prelim>) -> Result<()> {
        self.prepare(branch, BranchKind::Array)?;
        let rga = self.store.array(branch)?;
        let mut origin = rga.origin_for(index).ok_or(DocError::IndexOutOfBounds {
            index,
            length: rga.len(),
        })?;
        for value in values {
            origin = self.insert_value_after(branch, origin, value)?;
        }
        Ok(())
    }

    fn insert_value_after(&mut self, branch: &BranchId, origin: ItemId, value: Prelim) -> Result<ItemId> {
        self.touch_seq(branch);
        let id = self.store.clock.tick();
        let (slot, content) = self.new_slot(id, branch, &value);
        self.store.array_mut(branch)?.integrate(id, origin, slot);
        self.record_insert(branch, id);
        self.log.ops.push(Op::Insert {
            branch: branch.clone(),
            id,
            origin,
            content,
        });
        self.fill(&BranchId::Item(id), value)?;
        Ok(id)
    }

    fn new_slot(&mut self, id: ItemId, parent: &BranchId, value: &Prelim) -> (Slot, Content) {
        let kind = match value {
            Prelim::Json(v) => return (Slot::Json(v.clone()), Content::Json(v.clone())),
            Prelim::Text(_) => BranchKind::Text,
            Prelim::Array(_) => BranchKind::Array,
            Prelim::Map(_) => BranchKind::Map,
        };
        let child = BranchId::Item(id);
        self.store.create_branch(child.clone(), kind, parent.clone());
        self.record_created(&child);
        (Slot::Branch(child), Content::Branch(kind))
    }

    /// Write the content of a freshly created nested type.
    fn fill(&mut self, branch: &BranchId, value: Prelim) -> Result<()> {
        match value {
            Prelim::Json(_) => Ok(()),
            Prelim::Text(text) => self.insert_text_after(branch, ItemId::ROOT, &text),
            Prelim::Array(items) => {
                let mut origin = ItemId::ROOT;
                for item in items {
                    origin = self.insert_value_after(branch, origin, item)?;
                }
                Ok(())
            }
            Prelim::Map(entries) => {
                for (key, item) in entries {
                    self.set_entry(branch, key, Some(item))?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn map_set(&mut self, branch: &BranchId, key: &str, value: Prelim) -> Result<()> {
        self.prepare(branch, BranchKind::Map)?;
        self.set_entry(branch, key.to_string(), Some(value))
    }

    /// Remove a key. Returns false if it was not set.
    pub(crate) fn map_remove(&mut self, branch: &BranchId, key: &str) -> Result<bool> {
        self.prepare(branch, BranchKind::Map)?;
        if !self.store.map(branch)?.contains_key(key) {
            return Ok(false);
        }
        self.set_entry(branch, key.to_string(), None)?;
        Ok(true)
    }

    fn set_entry(&mut self, branch: &BranchId, key: String, value: Option<Prelim>) -> Result<()> {
        self.touch_map(branch, &key);
        let stamp = self.store.clock.tick();
        let (slot, content) = match &value {
            Some(v) => {
                let (slot, content) = self.new_slot(stamp, branch, v);
                (Some(slot), Some(content))
            }
            None => (None, None),
        };
        let outcome = self.store.map_mut(branch)?.set(key.clone(), slot, stamp);
        self.after_map_write(branch, &key, outcome);
        self.log.ops.push(Op::MapSet {
            branch: branch.clone(),
            key,
            stamp,
            content,
        });
        if let Some(v) = value {
            self.fill(&BranchId::Item(stamp), v)?;
        }
        Ok(())
    }

    fn after_map_write(&mut self, branch: &BranchId, key: &str, outcome: SetOutcome<Slot>) {
        if let SetOutcome::Applied { previous } = outcome {
            let replaced = previous.as_ref().and_then(|e| e.value.clone());
            self.log.revert.push(Revert::MapEntry {
                branch: branch.clone(),
                key: key.to_string(),
                previous,
            });
            if let Some(Slot::Branch(old)) = replaced {
                self.tombstone(&old);
            }
        }
    }

    pub(crate) fn delete_range(&mut self, branch: &BranchId, kind: BranchKind, index: usize, len: usize) -> Result<()> {
        self.prepare(branch, kind)?;
        if len == 0 {
            return Ok(());
        }
        let content = &self.store.branch(branch)?.content;
        let length = content.seq_len();
        if index + len > length {
            return Err(DocError::IndexOutOfBounds {
                index: index + len,
                length,
            });
        }
        for id in content.seq_range_ids(index, len) {
            self.delete_item(branch, id)?;
        }
        Ok(())
    }

    fn delete_item(&mut self, branch: &BranchId, id: ItemId) -> Result<bool> {
        self.touch_seq(branch);
        let content = &mut self.store.branch_mut(branch)?.content;
        if !content.seq_delete(&id) {
            return Ok(false);
        }
        let nested = match content {
            BranchContent::Array(rga) => rga.get(&id).and_then(|n| match &n.value {
                Slot::Branch(b) => Some(b.clone()),
                Slot::Json(_) => None,
            }),
            _ => None,
        };
        self.log.revert.push(Revert::Deleted {
            branch: branch.clone(),
            id,
        });
        self.log.deleted.push((branch.clone(), id));
        self.log.ops.push(Op::Delete {
            branch: branch.clone(),
            id,
        });
        if let Some(b) = nested {
            self.tombstone(&b);
        }
        Ok(true)
    }

    // ---- remote operations -------------------------------------------

    /// Integrate a remote update together with any operations still parked
    /// from earlier updates.
    pub(crate) fn integrate_update(&mut self, update: &Update) -> Result<()> {
        let previous = std::mem::take(&mut self.store.pending);
        if self.log.pending_before.is_none() {
            self.log.pending_before = Some(previous.clone());
        }
        let mut queue = previous;
        queue.extend(update.ops.iter().cloned());

        loop {
            let mut parked = Vec::new();
            let mut progress = false;
            for op in queue {
                if self.apply_remote(&op)? {
                    progress = true;
                } else {
                    parked.push(op);
                }
            }
            queue = parked;
            if !progress || queue.is_empty() {
                break;
            }
        }

        if !queue.is_empty() {
            tracing::debug!(parked = queue.len(), "Operations waiting for missing dependencies");
        }
        self.store.pending = queue;
        Ok(())
    }

    /// Whether a remote operation can target `branch` now.
    fn remote_target(&mut self, branch: &BranchId, kind: BranchKind) -> Result<bool> {
        match branch {
            BranchId::Root(_) => {
                self.prepare(branch, kind)?;
                Ok(true)
            }
            BranchId::Item(_) => {
                if !self.store.contains(branch) {
                    return Ok(false);
                }
                self.store.ensure_root(branch, kind)?;
                Ok(true)
            }
        }
    }

    /// Apply one remote operation. Returns false if a dependency is missing.
    fn apply_remote(&mut self, op: &Op) -> Result<bool> {
        match op {
            Op::InsertText {
                branch,
                id,
                origin,
                text,
            } => {
                if !self.remote_target(branch, BranchKind::Text)? {
                    return Ok(false);
                }
                self.touch_seq(branch);
                let mut prev = *origin;
                for (k, ch) in text.chars().enumerate() {
                    let item = ItemId::new(id.client, id.clock + k as u64);
                    match self.store.text_mut(branch)?.integrate(item, prev, ch) {
                        Integrate::Integrated => {
                            self.record_insert(branch, item);
                            self.store.clock.observe(&item);
                        }
                        Integrate::Duplicate => {}
                        Integrate::MissingOrigin => return Ok(false),
                    }
                    prev = item;
                }
                Ok(true)
            }
            Op::Insert {
                branch,
                id,
                origin,
                content,
            } => {
                if !self.remote_target(branch, BranchKind::Array)? {
                    return Ok(false);
                }
                let rga = self.store.array(branch)?;
                if rga.contains(id) {
                    return Ok(true);
                }
                if !origin.is_root() && !rga.contains(origin) {
                    return Ok(false);
                }
                self.touch_seq(branch);
                let slot = self.remote_slot(*id, branch, content);
                self.store.array_mut(branch)?.integrate(*id, *origin, slot);
                self.record_insert(branch, *id);
                self.store.clock.observe(id);
                Ok(true)
            }
            Op::Delete { branch, id } => {
                let known = self
                    .store
                    .branch(branch)
                    .map(|b| b.content.seq_contains(id))
                    .unwrap_or(false);
                if !known {
                    return Ok(false);
                }
                self.delete_item(branch, *id)?;
                Ok(true)
            }
            Op::MapSet {
                branch,
                key,
                stamp,
                content,
            } => {
                if !self.remote_target(branch, BranchKind::Map)? {
                    return Ok(false);
                }
                self.store.clock.observe(stamp);
                let stale = matches!(self.store.map(branch)?.entry(key), Some(e) if e.stamp >= *stamp);
                if stale {
                    // Losing writes still get their nested type so that its
                    // content can land somewhere harmless.
                    if let Some(Content::Branch(kind)) = content {
                        let child = BranchId::Item(*stamp);
                        if self.store.create_branch(child.clone(), *kind, branch.clone()) {
                            self.record_created(&child);
                            if let Ok(b) = self.store.branch_mut(&child) {
                                b.deleted = true;
                            }
                        }
                    }
                    return Ok(true);
                }
                self.touch_map(branch, key);
                let slot = content
                    .as_ref()
                    .map(|c| self.remote_slot(*stamp, branch, c));
                let outcome = self.store.map_mut(branch)?.set(key.clone(), slot, *stamp);
                self.after_map_write(branch, key, outcome);
                Ok(true)
            }
        }
    }

    fn remote_slot(&mut self, id: ItemId, parent: &BranchId, content: &Content) -> Slot {
        match content {
            Content::Json(v) => Slot::Json(v.clone()),
            Content::Branch(kind) => {
                let child = BranchId::Item(id);
                if self.store.create_branch(child.clone(), *kind, parent.clone()) {
                    self.record_created(&child);
                }
                Slot::Branch(child)
            }
        }
    }

    // ---- undo --------------------------------------------------------

    /// Revert the effect of a stack item. Returns true if anything changed.
    pub(crate) fn apply_stack_item(&mut self, item: &StackItem) -> Result<bool> {
        let mut changed = false;

        for (branch, id) in &item.inserted {
            let (branch, id) = self.store.follow_redone(branch, *id);
            let visible = self.store.is_alive(&branch)
                && self
                    .store
                    .branch(&branch)
                    .map(|b| b.content.seq_is_visible(&id))
                    .unwrap_or(false);
            if visible {
                changed |= self.delete_item(&branch, id)?;
            }
        }

        let mut groups: Vec<(BranchId, HashSet<ItemId>)> = Vec::new();
        for (branch, id) in &item.deleted {
            let (branch, id) = self.store.follow_redone(branch, *id);
            match groups.iter_mut().find(|(b, _)| *b == branch) {
                Some((_, ids)) => {
                    ids.insert(id);
                }
                None => groups.push((branch, HashSet::from([id]))),
            }
        }
        for (branch, ids) in groups {
            if self.store.is_alive(&branch) {
                changed |= self.restore_deleted(&branch, &ids)?;
            }
        }

        for (branch, key, old) in &item.map_changes {
            let branch = self.store.follow_branch(branch);
            if !self.store.is_alive(&branch) {
                continue;
            }
            let current = self.store.map(&branch)?.get(key).cloned();
            if current.as_ref() == old.as_ref() {
                continue;
            }
            let restored = old.as_ref().map(|slot| self.store.slot_prelim(slot));
            self.set_entry(&branch, key.clone(), restored)?;
            changed = true;
        }

        Ok(changed)
    }

    /// Re-insert copies of deleted elements right after their tombstones.
    ///
    /// A run of consecutive deleted elements is copied as a whole after its
    /// first tombstone. Each copy is remembered as the successor of its
    /// original so that older history steps can still find it.
    fn restore_deleted(&mut self, branch: &BranchId, ids: &HashSet<ItemId>) -> Result<bool> {
        enum Run {
            Text(Vec<ItemId>, String),
            Array(Vec<ItemId>, Vec<Prelim>),
        }

        let store: &DocStore = &*self.store;
        let mut runs: Vec<Run> = Vec::new();
        let mut open = false;
        match &store.branch(branch)?.content {
            BranchContent::Text(rga) => {
                for node in rga.iter_nodes() {
                    if !(node.deleted && ids.contains(&node.id)) {
                        open = false;
                        continue;
                    }
                    if open {
                        if let Some(Run::Text(originals, text)) = runs.last_mut() {
                            originals.push(node.id);
                            text.push(node.value);
                        }
                    } else {
                        runs.push(Run::Text(vec![node.id], node.value.to_string()));
                    }
                    open = true;
                }
            }
            BranchContent::Array(rga) => {
                for node in rga.iter_nodes() {
                    if !(node.deleted && ids.contains(&node.id)) {
                        open = false;
                        continue;
                    }
                    let value = store.slot_prelim(&node.value);
                    if open {
                        if let Some(Run::Array(originals, values)) = runs.last_mut() {
                            originals.push(node.id);
                            values.push(value);
                        }
                    } else {
                        runs.push(Run::Array(vec![node.id], vec![value]));
                    }
                    open = true;
                }
            }
            BranchContent::Map(_) => {}
        }

        let changed = !runs.is_empty();
        let client = self.store.client_id();
        for run in runs {
            match run {
                Run::Text(originals, text) => {
                    let base = self.store.clock.time();
                    self.insert_text_after(branch, originals[0], &text)?;
                    for (k, original) in originals.into_iter().enumerate() {
                        self.mark_redone(branch, original, ItemId::new(client, base + 1 + k as u64));
                    }
                }
                Run::Array(originals, values) => {
                    let mut origin = originals[0];
                    for (original, value) in originals.into_iter().zip(values) {
                        origin = self.insert_value_after(branch, origin, value)?;
                        self.mark_redone(branch, original, origin);
                    }
                }
            }
        }
        Ok(changed)
    }

    fn mark_redone(&mut self, branch: &BranchId, original: ItemId, copy: ItemId) {
        let key = (branch.clone(), original);
        self.store.redone.insert(key.clone(), (branch.clone(), copy));
        self.log.revert.push(Revert::Redone(key));
    }

    // ---- commit / rollback -------------------------------------------

    pub(crate) fn commit(self) -> CommitRecord {
        let TransactionMut {
            store, origin, log, ..
        } = self;
        let store: &DocStore = store;

        let all_inserted: HashSet<&(BranchId, ItemId)> = log.inserted.iter().collect();
        let inserted = log
            .inserted
            .iter()
            .filter(|(b, id)| {
                !log.created.contains(b)
                    && store
                        .branch(b)
                        .map(|br| br.content.seq_is_visible(id))
                        .unwrap_or(false)
            })
            .map(|(b, id)| TrackedItem {
                branch: b.clone(),
                id: *id,
                path: store.ancestors(b),
            })
            .collect();
        let deleted = log
            .deleted
            .iter()
            .filter(|entry| !log.created.contains(&entry.0) && !all_inserted.contains(entry))
            .map(|(b, id)| TrackedItem {
                branch: b.clone(),
                id: *id,
                path: store.ancestors(b),
            })
            .collect();

        let mut map_changes = Vec::new();
        for (branch, keys) in &log.map_before {
            for (key, old) in keys {
                let new = store.map(branch).ok().and_then(|m| m.get(key).cloned());
                if &new != old {
                    map_changes.push(TrackedKey {
                        branch: branch.clone(),
                        key: key.clone(),
                        old: old.clone(),
                        path: store.ancestors(branch),
                    });
                }
            }
        }

        let events = compute_events(store, &log);
        let update = if origin != Origin::Remote && !log.ops.is_empty() {
            Some(Update::new(log.ops))
        } else {
            None
        };

        CommitRecord {
            origin,
            events,
            update,
            inserted,
            deleted,
            map_changes,
        }
    }

    pub(crate) fn rollback(self) {
        let TransactionMut {
            store,
            log,
            start_clock,
            ..
        } = self;
        for entry in log.revert.into_iter().rev() {
            match entry {
                Revert::Integrated { branch, id } => {
                    if let Some(b) = store.branches.get_mut(&branch) {
                        b.content.seq_remove(&id);
                    }
                }
                Revert::Deleted { branch, id } => {
                    if let Some(b) = store.branches.get_mut(&branch) {
                        b.content.seq_restore(&id);
                    }
                }
                Revert::MapEntry {
                    branch,
                    key,
                    previous,
                } => {
                    if let Ok(map) = store.map_mut(&branch) {
                        map.restore(&key, previous);
                    }
                }
                Revert::Created(id) => {
                    store.branches.remove(&id);
                }
                Revert::Tombstoned(ids) => {
                    for id in ids {
                        if let Some(b) = store.branches.get_mut(&id) {
                            b.deleted = false;
                        }
                    }
                }
                Revert::Redone(key) => {
                    store.redone.remove(&key);
                }
            }
        }
        if let Some(pending) = log.pending_before {
            store.pending = pending;
        }
        store.clock.rewind(start_clock);
    }
}

fn compute_events(store: &DocStore, log: &TxnLog) -> Vec<BranchEvent> {
    let touched: BTreeSet<&BranchId> = log
        .seq_before
        .keys()
        .chain(log.map_before.keys())
        .collect();

    let mut events = Vec::new();
    for branch in touched {
        if log.created.contains(branch) || !store.is_alive(branch) {
            continue;
        }
        let change = match (log.seq_before.get(branch), log.map_before.get(branch)) {
            (Some(before), _) => seq_change(store, branch, before),
            (None, Some(keys)) => map_change(store, branch, keys),
            (None, None) => None,
        };
        if let Some(change) = change {
            events.push(BranchEvent {
                target: branch.clone(),
                path: store.ancestors(branch),
                change,
            });
        }
    }
    events
}

fn seq_change(store: &DocStore, branch: &BranchId, before: &HashSet<ItemId>) -> Option<BranchChange> {
    match &store.branch(branch).ok()?.content {
        BranchContent::Text(rga) => {
            let mut delta: DeltaBuilder<String> = DeltaBuilder::new();
            for node in rga.iter_nodes() {
                match (before.contains(&node.id), !node.deleted) {
                    (true, true) => delta.retain(1),
                    (true, false) => delta.delete(1),
                    (false, true) => delta.insert(node.value),
                    (false, false) => {}
                }
            }
            let delta = delta.finish();
            (!delta.is_empty()).then_some(BranchChange::Text(delta))
        }
        BranchContent::Array(rga) => {
            let mut delta: DeltaBuilder<Vec<Value>> = DeltaBuilder::new();
            let mut removed = Vec::new();
            for node in rga.iter_nodes() {
                match (before.contains(&node.id), !node.deleted) {
                    (true, true) => delta.retain(1),
                    (true, false) => {
                        delta.delete(1);
                        removed.push(store.slot_value(&node.value));
                    }
                    (false, true) => delta.insert(store.slot_value(&node.value)),
                    (false, false) => {}
                }
            }
            let delta = delta.finish();
            (!delta.is_empty()).then_some(BranchChange::Array { delta, removed })
        }
        BranchContent::Map(_) => None,
    }
}

fn map_change(store: &DocStore, branch: &BranchId, keys: &BTreeMap<String, Option<Slot>>) -> Option<BranchChange> {
    let map = store.map(branch).ok()?;
    let mut changes = Vec::new();
    for (key, old) in keys {
        let new = map.get(key);
        let action = match (old, new) {
            (None, Some(_)) => MapAction::Add,
            (Some(o), Some(n)) if o != n => MapAction::Update,
            (Some(_), None) => MapAction::Delete,
            _ => continue,
        };
        changes.push(MapChange {
            name: key.clone(),
            action,
            old_value: old.as_ref().map(|s| store.slot_json(s)),
            new_value: new.map(|s| store.slot_json(s)),
        });
    }
    (!changes.is_empty()).then_some(BranchChange::Map(changes))
}
