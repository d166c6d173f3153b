//! Notebook documents.
//!
//! A notebook document holds four shared types:
//!
//! - `cells`: array of cell maps, in display order
//! - `meta`: notebook metadata under the `metadata` key
//! - `model`: reserved for front-end model state
//! - `state`: `nbformat` and `nbformatMinor`
//!
//! [`NotebookModel`] keeps one wrapper per cell map. Wrappers are created
//! when a cell map first appears in `cells`, disposed when it is deleted,
//! and keyed by the map's branch id rather than the cell's `id` string.

use crate::cell::{keys, Cell, CellModel, CellType, SharedCell};
use crate::config::DocConfig;
use crate::container::SharedContainer;
use crate::doc::{Doc, Origin, Subscription};
use crate::error::{DocError, Result};
use crate::event::{BranchChange, BranchEvent, Delta, MapChange};
use crate::nbformat::{CellJson, NotebookJson, NBFORMAT_MAJOR, NBFORMAT_MINOR};
use crate::shared::{SharedArray, SharedMap};
use crate::store::DocStore;
use crate::transaction::ReadTxn;
use crate::update::{Content, Op, Update};
use crate::value::{BranchId, BranchKind};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

const CELLS: &str = "cells";
const META: &str = "meta";
const MODEL: &str = "model";
const STATE: &str = "state";
const METADATA: &str = "metadata";
const NBFORMAT: &str = "nbformat";
const NBFORMAT_MINOR_KEY: &str = "nbformatMinor";

/// What changed in a notebook during one transaction.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookChange {
    /// Edits to the cell list, as wrappers.
    #[serde(skip)]
    pub cells_change: Option<Vec<Delta<Vec<Cell>>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_change: Option<Vec<MapChange>>,
}

impl NotebookChange {
    /// The cell list edits with each cell replaced by its `id`.
    pub fn cell_ids_change(&self) -> Option<Vec<Delta<Vec<String>>>> {
        self.cells_change.as_ref().map(|delta| {
            delta
                .iter()
                .cloned()
                .map(|d| d.map(|cells| cells.iter().filter_map(|c| c.id().ok()).collect()))
                .collect()
        })
    }
}

pub(crate) struct NotebookInner {
    container: SharedContainer,
    cells_array: SharedArray,
    meta: SharedMap,
    model: SharedMap,
    state: SharedMap,
    event_capacity: usize,
    /// Cell wrappers by cell map.
    cache: Mutex<HashMap<BranchId, Cell>>,
    /// Wrappers in display order.
    cells: RwLock<Vec<Cell>>,
    changed: broadcast::Sender<NotebookChange>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// A collaborative notebook.
#[derive(Clone)]
pub struct NotebookModel {
    inner: Arc<NotebookInner>,
}

impl fmt::Debug for NotebookModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotebookModel")
            .field("doc", self.inner.container.doc())
            .field("cells", &self.len())
            .finish()
    }
}

impl Default for NotebookModel {
    fn default() -> Self {
        Self::new()
    }
}

impl NotebookModel {
    pub fn new() -> Self {
        Self::with_config(&DocConfig::default())
    }

    pub fn with_config(config: &DocConfig) -> Self {
        let doc = Doc::with_config(config);
        let cells_array = doc.get_or_insert_array(CELLS);
        let meta = doc.get_or_insert_map(META);
        let model = doc.get_or_insert_map(MODEL);
        let state = doc.get_or_insert_map(STATE);
        let container = SharedContainer::new(doc, vec![cells_array.branch().clone()], config);
        let (changed, _) = broadcast::channel(config.event_capacity.max(1));

        let notebook = Self {
            inner: Arc::new(NotebookInner {
                container,
                cells_array,
                meta,
                model,
                state,
                event_capacity: config.event_capacity,
                cache: Mutex::new(HashMap::new()),
                cells: RwLock::new(Vec::new()),
                changed,
                subscriptions: Mutex::new(Vec::new()),
            }),
        };
        notebook.attach_observers();
        notebook
    }

    pub(crate) fn from_inner(inner: Arc<NotebookInner>) -> Self {
        Self { inner }
    }

    /// Load an nbformat-4 notebook. Loading is not recorded in the undo
    /// history.
    pub fn from_json(value: JsonValue, config: &DocConfig) -> Result<Self> {
        let parsed: NotebookJson = serde_json::from_value(value)?;
        let seeds = parsed
            .cells
            .into_iter()
            .map(|cell| serde_json::from_value::<CellJson>(cell)?.into_seed())
            .collect::<Result<Vec<_>>>()?;

        let notebook = Self::with_config(config);
        let inner = &notebook.inner;
        inner.container.transact(false, |txn| {
            inner.meta.set(txn, METADATA, parsed.metadata)?;
            inner.state.set(txn, NBFORMAT, json!(parsed.nbformat))?;
            inner.state.set(txn, NBFORMAT_MINOR_KEY, json!(parsed.nbformat_minor))?;
            inner
                .cells_array
                .insert(txn, 0, seeds.into_iter().map(|s| s.into_prelim()).collect())
        })?;
        tracing::debug!(cells = notebook.len(), "Loaded notebook");
        Ok(notebook)
    }

    fn attach_observers(&self) {
        let doc = self.inner.container.doc();

        let weak = Arc::downgrade(&self.inner);
        let cells = doc.observe(self.inner.cells_array.branch(), move |events, _origin| {
            if let Some(inner) = weak.upgrade() {
                NotebookModel { inner }.on_cells_changed(events);
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let state = doc.observe(self.inner.state.branch(), move |events, _origin| {
            if let Some(inner) = weak.upgrade() {
                NotebookModel { inner }.on_state_changed(events);
            }
        });

        self.inner.subscriptions.lock().extend([cells, state]);
    }

    fn on_cells_changed(&self, events: &[BranchEvent]) {
        let Some((delta, removed)) = events.iter().find_map(|e| match &e.change {
            BranchChange::Array { delta, removed } => Some((delta, removed)),
            _ => None,
        }) else {
            return;
        };

        // Wrap maps that arrived from elsewhere (remote updates, undo,
        // loading) without holding the cache across document reads.
        let unknown: Vec<SharedMap> = {
            let cache = self.inner.cache.lock();
            delta
                .iter()
                .filter_map(|d| match d {
                    Delta::Insert(values) => Some(values),
                    _ => None,
                })
                .flatten()
                .filter_map(|v| v.as_map())
                .filter(|m| !cache.contains_key(m.branch()))
                .cloned()
                .collect()
        };
        let doc = self.doc().clone();
        let mut created = Vec::with_capacity(unknown.len());
        for map in unknown {
            match CellModel::wrap(&doc, map.clone(), self.inner.event_capacity) {
                Ok(model) => created.push((map.branch().clone(), Cell::from_model(model))),
                Err(err) => tracing::warn!(branch = %map.branch(), %err, "Skipping malformed cell"),
            }
        }

        let owner = Arc::downgrade(&self.inner);
        let mut change = Vec::with_capacity(delta.len());
        let evicted: Vec<Cell> = {
            let mut cache = self.inner.cache.lock();
            for (branch, cell) in created {
                cache.entry(branch).or_insert(cell);
            }
            let evicted = removed
                .iter()
                .filter_map(|v| v.branch())
                .filter_map(|b| cache.remove(b))
                .collect();

            let mut cells = self.inner.cells.write();
            let mut index = 0;
            for d in delta {
                match d {
                    Delta::Insert(values) => {
                        let inserted: Vec<Cell> = values
                            .iter()
                            .filter_map(|v| v.branch())
                            .filter_map(|b| cache.get(b).cloned())
                            .collect();
                        for cell in &inserted {
                            cell.model().set_owner(owner.clone());
                        }
                        let count = inserted.len();
                        index = index.min(cells.len());
                        cells.splice(index..index, inserted.iter().cloned());
                        index += count;
                        change.push(Delta::Insert(inserted));
                    }
                    Delta::Delete(n) => {
                        let end = (index + n).min(cells.len());
                        cells.drain(index..end);
                        change.push(Delta::Delete(*n));
                    }
                    Delta::Retain(n) => {
                        index = (index + n).min(cells.len());
                        change.push(Delta::Retain(*n));
                    }
                }
            }
            evicted
        };

        if !evicted.is_empty() {
            tracing::trace!(count = evicted.len(), "Disposing deleted cells");
        }
        for cell in evicted {
            cell.dispose();
        }

        let _ = self.inner.changed.send(NotebookChange {
            cells_change: Some(change),
            state_change: None,
        });
    }

    fn on_state_changed(&self, events: &[BranchEvent]) {
        let changes: Vec<MapChange> = events
            .iter()
            .filter_map(|e| match &e.change {
                BranchChange::Map(changes) => Some(changes.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        if changes.is_empty() {
            return;
        }
        let _ = self.inner.changed.send(NotebookChange {
            cells_change: None,
            state_change: Some(changes),
        });
    }

    pub fn container(&self) -> &SharedContainer {
        &self.inner.container
    }

    pub fn doc(&self) -> &Doc {
        self.inner.container.doc()
    }

    /// The `model` map, for front-end state that is shared but not part of
    /// the notebook file.
    pub fn model_map(&self) -> &SharedMap {
        &self.inner.model
    }

    pub fn get_cell(&self, index: usize) -> Option<Cell> {
        self.inner.cells.read().get(index).cloned()
    }

    pub fn cells(&self) -> Vec<Cell> {
        self.inner.cells.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert_cell(&self, index: usize, cell: impl Into<Cell>) -> Result<()> {
        self.insert_cells(index, vec![cell.into()])
    }

    /// Insert cells at `index`. Each wrapper is bound to this notebook and
    /// keeps working on the inserted copy of its content.
    pub fn insert_cells(&self, index: usize, cells: Vec<Cell>) -> Result<()> {
        let mut seen = HashSet::new();
        let mut contents = Vec::with_capacity(cells.len());
        for cell in &cells {
            if cell.notebook().is_some() || !seen.insert(cell.model().branch()) {
                return Err(DocError::CellAlreadyBound(cell.id()?));
            }
            contents.push(cell.model().content_prelim()?);
        }

        let inner = &self.inner;
        let owner = Arc::downgrade(inner);
        let doc = self.doc().clone();
        let count = cells.len();
        inner.container.transact(true, |txn| {
            inner.cells_array.insert(txn, index, contents)?;
            let mut maps = Vec::with_capacity(count);
            for i in index..index + count {
                let map = inner
                    .cells_array
                    .get(txn, i)?
                    .and_then(|v| v.as_map().cloned())
                    .ok_or_else(|| DocError::MissingField(format!("cells[{i}]")))?;
                maps.push(map);
            }
            let mut cache = inner.cache.lock();
            for (cell, map) in cells.iter().zip(maps) {
                cell.model().bind(doc.clone(), map.clone(), owner.clone());
                cache.insert(map.branch().clone(), cell.clone());
            }
            Ok(())
        })
    }

    /// Move the cell at `from` so that it ends up at `to`.
    ///
    /// The cell map is copied to the target and the original deleted; the
    /// wrapper follows its content, so existing handles stay valid.
    pub fn move_cell(&self, from: usize, to: usize) -> Result<()> {
        let length = self.len();
        let cell = self
            .get_cell(from)
            .ok_or(DocError::IndexOutOfBounds { index: from, length })?;
        if to >= length {
            return Err(DocError::IndexOutOfBounds { index: to, length });
        }
        if from == to {
            return Ok(());
        }
        let content = cell.model().content_prelim()?;
        let old_branch = cell.model().branch();

        let inner = &self.inner;
        let owner = Arc::downgrade(inner);
        let doc = self.doc().clone();
        inner.container.transact(true, |txn| {
            inner.cells_array.delete(txn, from, 1)?;
            inner.cells_array.insert(txn, to, vec![content])?;
            let map = inner
                .cells_array
                .get(txn, to)?
                .and_then(|v| v.as_map().cloned())
                .ok_or_else(|| DocError::MissingField(format!("cells[{to}]")))?;
            let mut cache = inner.cache.lock();
            cache.remove(&old_branch);
            cell.model().bind(doc.clone(), map.clone(), owner.clone());
            cache.insert(map.branch().clone(), cell.clone());
            Ok(())
        })
    }

    pub fn delete_cell(&self, index: usize) -> Result<()> {
        self.delete_cell_range(index, index + 1)
    }

    /// Delete cells `[start, end)`.
    pub fn delete_cell_range(&self, start: usize, end: usize) -> Result<()> {
        let inner = &self.inner;
        inner.container.transact(true, |txn| {
            inner.cells_array.delete(txn, start, end.saturating_sub(start))
        })
    }

    fn state_int(&self, key: &str) -> Result<Option<i64>> {
        let state = &self.inner.state;
        self.doc()
            .read(|txn| Ok(state.get_json(txn, key)?.and_then(|v| v.as_i64())))
    }

    fn set_state_int(&self, key: &str, value: i64) -> Result<()> {
        let state = &self.inner.state;
        self.inner
            .container
            .transact(false, |txn| state.set(txn, key, json!(value)))
    }

    pub fn nbformat(&self) -> Result<Option<i64>> {
        self.state_int(NBFORMAT)
    }

    /// Not recorded in the undo history.
    pub fn set_nbformat(&self, value: i64) -> Result<()> {
        self.set_state_int(NBFORMAT, value)
    }

    pub fn nbformat_minor(&self) -> Result<Option<i64>> {
        self.state_int(NBFORMAT_MINOR_KEY)
    }

    /// Not recorded in the undo history.
    pub fn set_nbformat_minor(&self, value: i64) -> Result<()> {
        self.set_state_int(NBFORMAT_MINOR_KEY, value)
    }

    /// Notebook metadata, `{"orig_nbformat": 1}` when never set.
    pub fn get_metadata(&self) -> Result<JsonValue> {
        let meta = &self.inner.meta;
        self.doc().read(|txn| {
            Ok(meta
                .get_json(txn, METADATA)?
                .unwrap_or_else(|| json!({"orig_nbformat": 1})))
        })
    }

    pub fn set_metadata(&self, metadata: JsonValue) -> Result<()> {
        let meta = &self.inner.meta;
        self.inner
            .container
            .transact(false, |txn| meta.set(txn, METADATA, metadata))
    }

    /// Shallow-merge `partial` into the metadata.
    pub fn update_metadata(&self, partial: JsonValue) -> Result<()> {
        let JsonValue::Object(partial) = partial else {
            return Err(DocError::TypeMismatch {
                expected: "object".to_string(),
                found: json_kind(&partial).to_string(),
            });
        };
        let mut metadata = match self.get_metadata()? {
            JsonValue::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        metadata.extend(partial);
        self.set_metadata(JsonValue::Object(metadata))
    }

    /// The notebook as nbformat JSON.
    pub fn to_json(&self) -> Result<JsonValue> {
        let cells = self
            .cells()
            .iter()
            .map(|c| c.to_json())
            .collect::<Result<Vec<_>>>()?;
        let notebook = NotebookJson {
            metadata: self.get_metadata()?,
            nbformat: self.nbformat()?.unwrap_or(NBFORMAT_MAJOR),
            nbformat_minor: self.nbformat_minor()?.unwrap_or(NBFORMAT_MINOR),
            cells,
        };
        Ok(serde_json::to_value(notebook)?)
    }

    /// Integrate a peer's update. Cells with an unknown `cell_type`, and
    /// writes that would change the type of an existing cell, are rejected
    /// before anything is applied.
    pub fn apply_update(&self, update: &Update) -> Result<()> {
        if self.is_disposed() {
            return Err(DocError::Disposed("container"));
        }
        let cells = self.inner.cells_array.branch();
        self.doc().transact_mut(Origin::Remote, |txn| {
            validate_cell_types(txn.store(), cells, update)?;
            txn.integrate_update(update)
        })
    }

    pub fn encode_state_as_update(&self) -> Result<Update> {
        self.inner.container.encode_state_as_update()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<Update> {
        self.inner.container.subscribe_updates()
    }

    /// Cell list and state changes, one message per transaction and kind.
    pub fn subscribe(&self) -> broadcast::Receiver<NotebookChange> {
        self.inner.changed.subscribe()
    }

    pub fn can_undo(&self) -> bool {
        self.inner.container.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.container.can_redo()
    }

    pub fn undo(&self) -> Result<bool> {
        self.inner.container.undo()
    }

    pub fn redo(&self) -> Result<bool> {
        self.inner.container.redo()
    }

    pub fn clear_undo_history(&self) {
        self.inner.container.clear_undo_history()
    }

    pub fn stop_capturing(&self) {
        self.inner.container.stop_capturing()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.container.is_disposed()
    }

    /// Dispose every cell and the underlying document.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.subscriptions.lock().clear();
        let cells: Vec<Cell> = self.inner.cache.lock().drain().map(|(_, c)| c).collect();
        for cell in cells {
            cell.dispose();
        }
        self.inner.cells.write().clear();
        self.inner.container.dispose();
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Every cell map inserted into `cells` by `update` must carry a known
/// `cell_type`, and the `cell_type` of cells already in `store` is fixed.
fn validate_cell_types(store: &DocStore, cells: &BranchId, update: &Update) -> Result<()> {
    let mut types: HashMap<BranchId, Option<&JsonValue>> = HashMap::new();
    for op in &update.ops {
        if let Op::Insert {
            branch,
            id,
            content: Content::Branch(BranchKind::Map),
            ..
        } = op
        {
            if branch == cells {
                types.entry(BranchId::Item(*id)).or_insert(None);
            }
        }
    }
    for op in &update.ops {
        let Op::MapSet {
            branch,
            key,
            content,
            ..
        } = op
        else {
            continue;
        };
        if key != keys::CELL_TYPE {
            continue;
        }
        if let Some(slot) = types.get_mut(branch) {
            if let Some(Content::Json(value)) = content {
                *slot = Some(value);
            }
            continue;
        }
        let existing = match store.branch(branch) {
            Ok(b) if b.parent.as_ref() == Some(cells) => store.map(branch)?,
            _ => continue,
        };
        let current = existing.get(keys::CELL_TYPE).map(|slot| store.slot_json(slot));
        let incoming = match content {
            Some(Content::Json(value)) => Some(value),
            _ => None,
        };
        if incoming != current.as_ref() || matches!(content, Some(Content::Branch(_))) {
            return Err(DocError::CellTypeChanged(branch.to_string()));
        }
    }
    for value in types.into_values() {
        match value {
            Some(JsonValue::String(name)) => {
                name.parse::<CellType>()?;
            }
            Some(other) => return Err(DocError::UnknownCellType(other.to_string())),
            None => return Err(DocError::UnknownCellType("undefined".to_string())),
        }
    }
    Ok(())
}
