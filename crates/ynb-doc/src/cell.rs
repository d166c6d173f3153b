//! Notebook cells.
//!
//! A cell is a shared map holding `id`, `cell_type`, `source` (shared
//! text) and `metadata`; code cells add `execution_count` and `outputs`
//! (shared array), markdown and raw cells may carry `attachments`.
//!
//! The wrappers ([`CodeCell`], [`MarkdownCell`], [`RawCell`], unified by
//! [`Cell`]) are cheap handles. A cell is either *standalone*, living in
//! its own document with its own undo history, or *bound* to a
//! [`NotebookModel`], whose history it shares.

use crate::config::DocConfig;
use crate::doc::{Doc, Origin, Subscription};
use crate::error::{DocError, Result};
use crate::event::{BranchChange, BranchEvent, Delta, ValueChange};
use crate::notebook::{NotebookInner, NotebookModel};
use crate::shared::{SharedArray, SharedMap, SharedText};
use crate::transaction::{ReadTxn, Transaction, TransactionMut};
use crate::undo::UndoManager;
use crate::value::{BranchId, Prelim, Value};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Keys of a cell map.
pub mod keys {
    pub const ID: &str = "id";
    pub const CELL_TYPE: &str = "cell_type";
    pub const SOURCE: &str = "source";
    pub const METADATA: &str = "metadata";
    pub const OUTPUTS: &str = "outputs";
    pub const EXECUTION_COUNT: &str = "execution_count";
    pub const ATTACHMENTS: &str = "attachments";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Code => "code",
            CellType::Markdown => "markdown",
            CellType::Raw => "raw",
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CellType {
    type Err = DocError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "code" => Ok(CellType::Code),
            "markdown" => Ok(CellType::Markdown),
            "raw" => Ok(CellType::Raw),
            other => Err(DocError::UnknownCellType(other.to_string())),
        }
    }
}

/// What changed in a cell during one transaction. Absent fields did not
/// change.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_change: Option<Vec<Delta<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs_change: Option<Vec<Delta<Vec<JsonValue>>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_change: Option<ValueChange<JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count_change: Option<ValueChange<JsonValue>>,
}

impl CellChange {
    pub fn is_empty(&self) -> bool {
        self.source_change.is_none()
            && self.outputs_change.is_none()
            && self.metadata_change.is_none()
            && self.execution_count_change.is_none()
    }
}

/// Generate a fresh cell id.
pub fn new_cell_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Initial content of a cell.
#[derive(Clone, Debug)]
pub(crate) struct CellSeed {
    pub cell_type: CellType,
    pub id: String,
    pub source: String,
    pub metadata: JsonValue,
    pub execution_count: Option<i64>,
    pub outputs: Vec<JsonValue>,
    pub attachments: Option<JsonValue>,
}

impl CellSeed {
    pub fn new(cell_type: CellType, id: Option<String>) -> Self {
        Self {
            cell_type,
            id: id.unwrap_or_else(new_cell_id),
            source: String::new(),
            metadata: json!({}),
            execution_count: None,
            outputs: Vec::new(),
            attachments: None,
        }
    }

    pub fn into_prelim(self) -> Prelim {
        let mut entries = vec![
            (keys::ID.to_string(), Prelim::Json(JsonValue::String(self.id))),
            (
                keys::CELL_TYPE.to_string(),
                Prelim::Json(JsonValue::String(self.cell_type.as_str().to_string())),
            ),
            (keys::SOURCE.to_string(), Prelim::Text(self.source)),
            (keys::METADATA.to_string(), Prelim::Json(self.metadata)),
        ];
        match self.cell_type {
            CellType::Code => {
                entries.push((
                    keys::EXECUTION_COUNT.to_string(),
                    Prelim::Json(self.execution_count.map(JsonValue::from).unwrap_or(JsonValue::Null)),
                ));
                entries.push((
                    keys::OUTPUTS.to_string(),
                    Prelim::Array(self.outputs.into_iter().map(Prelim::Json).collect()),
                ));
            }
            CellType::Markdown | CellType::Raw => {
                if let Some(attachments) = self.attachments {
                    entries.push((keys::ATTACHMENTS.to_string(), Prelim::Json(attachments)));
                }
            }
        }
        Prelim::Map(entries)
    }
}

struct Location {
    doc: Doc,
    map: SharedMap,
}

pub(crate) struct CellInner {
    cell_type: CellType,
    location: RwLock<Location>,
    notebook: RwLock<Weak<NotebookInner>>,
    /// History of a standalone cell.
    own_undo: Mutex<Option<UndoManager>>,
    origin: Origin,
    changed: broadcast::Sender<CellChange>,
    subscription: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
}

/// The state and behaviour shared by every cell type.
#[derive(Clone)]
pub struct CellModel {
    inner: Arc<CellInner>,
}

impl fmt::Debug for CellModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellModel")
            .field("cell_type", &self.inner.cell_type)
            .field("branch", &self.branch())
            .field("standalone", &self.is_standalone())
            .finish()
    }
}

fn source_text<T: ReadTxn>(txn: &T, map: &SharedMap) -> Result<SharedText> {
    map.get(txn, keys::SOURCE)?
        .and_then(|v| v.as_text().cloned())
        .ok_or_else(|| DocError::MissingField(keys::SOURCE.to_string()))
}

fn outputs_array<T: ReadTxn>(txn: &T, map: &SharedMap) -> Result<SharedArray> {
    map.get(txn, keys::OUTPUTS)?
        .and_then(|v| v.as_array().cloned())
        .ok_or_else(|| DocError::MissingField(keys::OUTPUTS.to_string()))
}

impl CellModel {
    /// Build a cell in a private document.
    fn build(cell_type: CellType, content: Prelim, standalone: bool, config: &DocConfig) -> Result<Self> {
        let doc = Doc::with_config(config);
        let holder = doc.get_or_insert_array("");
        let map = doc.transact_mut(Origin::Untracked, |txn| {
            holder.insert(txn, 0, vec![content])?;
            match holder.get(txn, 0)? {
                Some(Value::Map(map)) => Ok(map),
                _ => Err(DocError::MissingField("cell".to_string())),
            }
        })?;
        let origin = Origin::local();
        let own_undo = standalone.then(|| {
            UndoManager::new(&doc, vec![map.branch().clone()], [origin], config.capture_timeout)
        });
        Ok(Self::from_parts(cell_type, doc, map, own_undo, origin, config.event_capacity))
    }

    fn from_parts(
        cell_type: CellType,
        doc: Doc,
        map: SharedMap,
        own_undo: Option<UndoManager>,
        origin: Origin,
        capacity: usize,
    ) -> Self {
        let (changed, _) = broadcast::channel(capacity.max(1));
        let model = Self {
            inner: Arc::new(CellInner {
                cell_type,
                location: RwLock::new(Location { doc, map }),
                notebook: RwLock::new(Weak::new()),
                own_undo: Mutex::new(own_undo),
                origin,
                changed,
                subscription: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        };
        model.attach_observer();
        model
    }

    /// Wrap an existing cell map, dispatching on its stored type.
    pub(crate) fn wrap(doc: &Doc, map: SharedMap, capacity: usize) -> Result<Self> {
        let stored = doc.read(|txn| map.get_json(txn, keys::CELL_TYPE))?;
        let cell_type = match stored {
            Some(JsonValue::String(name)) => name.parse()?,
            Some(other) => return Err(DocError::UnknownCellType(other.to_string())),
            None => return Err(DocError::UnknownCellType("undefined".to_string())),
        };
        Ok(Self::from_parts(cell_type, doc.clone(), map, None, Origin::local(), capacity))
    }

    fn attach_observer(&self) {
        let weak = Arc::downgrade(&self.inner);
        let (doc, map) = self.location();
        let subscription = doc.observe_deep(map.branch(), move |events, _origin| {
            if let Some(inner) = weak.upgrade() {
                CellModel { inner }.handle_events(events);
            }
        });
        *self.inner.subscription.lock() = Some(subscription);
    }

    fn handle_events(&self, events: &[BranchEvent]) {
        if self.is_disposed() {
            return;
        }
        let (doc, map) = self.location();
        let children = doc.read(|txn| {
            Ok((
                map.get(txn, keys::SOURCE)?.and_then(|v| v.branch().cloned()),
                map.get(txn, keys::OUTPUTS)?.and_then(|v| v.branch().cloned()),
            ))
        });
        let Ok((source, outputs)) = children else {
            return;
        };

        let mut change = CellChange::default();
        for event in events {
            match &event.change {
                BranchChange::Text(delta) if source.as_ref() == Some(&event.target) => {
                    change.source_change = Some(delta.clone());
                }
                BranchChange::Array { delta, .. } if outputs.as_ref() == Some(&event.target) => {
                    change.outputs_change = Some(
                        delta
                            .iter()
                            .cloned()
                            .map(|d| {
                                d.map(|values| {
                                    values
                                        .into_iter()
                                        .map(|v| v.into_json().unwrap_or(JsonValue::Null))
                                        .collect()
                                })
                            })
                            .collect(),
                    );
                }
                BranchChange::Map(changes) if &event.target == map.branch() => {
                    for c in changes {
                        let value_change = ValueChange {
                            old_value: c.old_value.clone(),
                            new_value: c.new_value.clone(),
                        };
                        match c.name.as_str() {
                            keys::METADATA => change.metadata_change = Some(value_change),
                            keys::EXECUTION_COUNT => change.execution_count_change = Some(value_change),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        if !change.is_empty() {
            let _ = self.inner.changed.send(change);
        }
    }

    fn location(&self) -> (Doc, SharedMap) {
        let location = self.inner.location.read();
        (location.doc.clone(), location.map.clone())
    }

    /// The document currently holding this cell.
    pub fn doc(&self) -> Doc {
        self.location().0
    }

    /// The shared map this cell wraps.
    pub fn shared_map(&self) -> SharedMap {
        self.location().1
    }

    pub(crate) fn branch(&self) -> BranchId {
        self.inner.location.read().map.branch().clone()
    }

    /// Point this wrapper at a map inside a notebook document.
    pub(crate) fn bind(&self, doc: Doc, map: SharedMap, notebook: Weak<NotebookInner>) {
        *self.inner.location.write() = Location { doc, map };
        *self.inner.notebook.write() = notebook;
        self.inner.own_undo.lock().take();
        self.attach_observer();
    }

    pub(crate) fn set_owner(&self, notebook: Weak<NotebookInner>) {
        *self.inner.notebook.write() = notebook;
    }

    /// The notebook this cell is bound to.
    pub fn notebook(&self) -> Option<NotebookModel> {
        self.inner.notebook.read().upgrade().map(NotebookModel::from_inner)
    }

    pub fn is_standalone(&self) -> bool {
        self.inner.own_undo.lock().is_some()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DocError::Disposed("cell"));
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&Transaction<'_>, &SharedMap) -> Result<R>) -> Result<R> {
        self.ensure_alive()?;
        let (doc, map) = self.location();
        doc.read(|txn| f(txn, &map))
    }

    /// Run `f` on this cell's map in one transaction. Bound cells go
    /// through their notebook so that tracked edits land in its history.
    fn transact<R>(&self, track: bool, f: impl FnOnce(&mut TransactionMut<'_>, &SharedMap) -> Result<R>) -> Result<R> {
        self.ensure_alive()?;
        let (doc, map) = self.location();
        if let Some(notebook) = self.notebook() {
            return notebook.container().transact(track, |txn| f(txn, &map));
        }
        let origin = if track { self.inner.origin } else { Origin::Untracked };
        doc.transact_mut(origin, |txn| f(txn, &map))
    }

    pub fn id(&self) -> Result<String> {
        self.read(|txn, map| match map.get_json(txn, keys::ID)? {
            Some(JsonValue::String(id)) => Ok(id),
            _ => Err(DocError::MissingField(keys::ID.to_string())),
        })
    }

    pub fn cell_type(&self) -> CellType {
        self.inner.cell_type
    }

    pub fn source(&self) -> Result<String> {
        self.read(|txn, map| source_text(txn, map)?.get_string(txn))
    }

    pub fn set_source(&self, source: &str) -> Result<()> {
        self.transact(true, |txn, map| source_text(txn, map)?.set(txn, source))
    }

    /// Replace `[start, end)` of the source with `text`.
    pub fn update_source(&self, start: usize, end: usize, text: &str) -> Result<()> {
        self.transact(true, |txn, map| source_text(txn, map)?.update(txn, start, end, text))
    }

    pub fn metadata(&self) -> Result<JsonValue> {
        self.read(|txn, map| Ok(map.get_json(txn, keys::METADATA)?.unwrap_or_else(|| json!({}))))
    }

    pub fn set_metadata(&self, metadata: JsonValue) -> Result<()> {
        self.transact(true, |txn, map| map.set(txn, keys::METADATA, metadata))
    }

    pub(crate) fn execution_count(&self) -> Result<Option<i64>> {
        self.read(|txn, map| Ok(map.get_json(txn, keys::EXECUTION_COUNT)?.and_then(|v| v.as_i64())))
    }

    pub(crate) fn set_execution_count(&self, count: Option<i64>) -> Result<()> {
        if self.execution_count()? == count {
            return Ok(());
        }
        let value = count.map(JsonValue::from).unwrap_or(JsonValue::Null);
        self.transact(true, |txn, map| map.set(txn, keys::EXECUTION_COUNT, value))
    }

    pub(crate) fn outputs(&self) -> Result<Vec<JsonValue>> {
        self.read(|txn, map| outputs_array(txn, map)?.to_json(txn))
    }

    pub(crate) fn set_outputs(&self, outputs: Vec<JsonValue>) -> Result<()> {
        self.transact(false, |txn, map| {
            let array = outputs_array(txn, map)?;
            let len = array.len(txn)?;
            array.delete(txn, 0, len)?;
            array.insert(txn, 0, outputs.into_iter().map(Prelim::Json).collect())
        })
    }

    pub(crate) fn update_outputs(&self, start: usize, end: usize, outputs: Vec<JsonValue>) -> Result<()> {
        self.transact(false, |txn, map| {
            let array = outputs_array(txn, map)?;
            let len = array.len(txn)?;
            if start > len {
                return Err(DocError::IndexOutOfBounds { index: start, length: len });
            }
            let count = if end < len {
                end.saturating_sub(start)
            } else {
                len - start
            };
            array.delete(txn, start, count)?;
            array.insert(txn, start, outputs.into_iter().map(Prelim::Json).collect())
        })
    }

    pub(crate) fn attachments(&self) -> Result<Option<JsonValue>> {
        self.read(|txn, map| map.get_json(txn, keys::ATTACHMENTS))
    }

    pub(crate) fn set_attachments(&self, attachments: Option<JsonValue>) -> Result<()> {
        self.transact(true, |txn, map| match attachments {
            Some(value) => map.set(txn, keys::ATTACHMENTS, value),
            None => map.remove(txn, keys::ATTACHMENTS).map(|_| ()),
        })
    }

    /// Plain nbformat cell.
    pub fn to_json(&self) -> Result<JsonValue> {
        let cell_type = self.cell_type();
        self.read(|txn, map| {
            let mut out = serde_json::Map::new();
            out.insert(
                keys::ID.to_string(),
                map.get_json(txn, keys::ID)?.unwrap_or(JsonValue::Null),
            );
            out.insert(keys::CELL_TYPE.to_string(), json!(cell_type.as_str()));
            out.insert(
                keys::SOURCE.to_string(),
                JsonValue::String(source_text(txn, map)?.get_string(txn)?),
            );
            out.insert(
                keys::METADATA.to_string(),
                map.get_json(txn, keys::METADATA)?.unwrap_or_else(|| json!({})),
            );
            match cell_type {
                CellType::Code => {
                    out.insert(
                        keys::OUTPUTS.to_string(),
                        JsonValue::Array(outputs_array(txn, map)?.to_json(txn)?),
                    );
                    out.insert(
                        keys::EXECUTION_COUNT.to_string(),
                        map.get_json(txn, keys::EXECUTION_COUNT)?.unwrap_or(JsonValue::Null),
                    );
                }
                CellType::Markdown | CellType::Raw => {
                    if let Some(attachments) = map.get_json(txn, keys::ATTACHMENTS)? {
                        out.insert(keys::ATTACHMENTS.to_string(), attachments);
                    }
                }
            }
            Ok(JsonValue::Object(out))
        })
    }

    /// Deep copy of the cell's content.
    pub(crate) fn content_prelim(&self) -> Result<Prelim> {
        self.read(|txn, map| map.to_prelim(txn))
    }

    /// A standalone copy with the same id and content.
    pub fn clone_detached(&self) -> Result<Cell> {
        let content = self.content_prelim()?;
        let model = CellModel::build(self.cell_type(), content, true, &DocConfig::default())?;
        Ok(Cell::from_model(model))
    }

    pub fn undo(&self) -> Result<bool> {
        self.ensure_alive()?;
        if let Some(notebook) = self.notebook() {
            return notebook.undo();
        }
        match self.inner.own_undo.lock().as_ref() {
            Some(undo) => undo.undo(),
            None => Ok(false),
        }
    }

    pub fn redo(&self) -> Result<bool> {
        self.ensure_alive()?;
        if let Some(notebook) = self.notebook() {
            return notebook.redo();
        }
        match self.inner.own_undo.lock().as_ref() {
            Some(undo) => undo.redo(),
            None => Ok(false),
        }
    }

    pub fn can_undo(&self) -> bool {
        if let Some(notebook) = self.notebook() {
            return notebook.can_undo();
        }
        self.inner
            .own_undo
            .lock()
            .as_ref()
            .map(|u| u.can_undo())
            .unwrap_or(false)
    }

    pub fn can_redo(&self) -> bool {
        if let Some(notebook) = self.notebook() {
            return notebook.can_redo();
        }
        self.inner
            .own_undo
            .lock()
            .as_ref()
            .map(|u| u.can_redo())
            .unwrap_or(false)
    }

    pub fn clear_undo_history(&self) {
        if let Some(notebook) = self.notebook() {
            notebook.clear_undo_history();
            return;
        }
        if let Some(undo) = self.inner.own_undo.lock().as_ref() {
            undo.clear();
        }
    }

    /// Changes to this cell, one message per transaction.
    pub fn subscribe(&self) -> broadcast::Receiver<CellChange> {
        self.inner.changed.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Detach from the document. Later calls fail with `Disposed`.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.subscription.lock().take();
        self.inner.own_undo.lock().take();
    }

    pub fn ptr_eq(&self, other: &CellModel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Operations every cell supports.
pub trait SharedCell {
    fn model(&self) -> &CellModel;

    fn id(&self) -> Result<String> {
        self.model().id()
    }

    fn cell_type(&self) -> CellType {
        self.model().cell_type()
    }

    fn source(&self) -> Result<String> {
        self.model().source()
    }

    fn set_source(&self, source: &str) -> Result<()> {
        self.model().set_source(source)
    }

    fn update_source(&self, start: usize, end: usize, text: &str) -> Result<()> {
        self.model().update_source(start, end, text)
    }

    fn metadata(&self) -> Result<JsonValue> {
        self.model().metadata()
    }

    fn set_metadata(&self, metadata: JsonValue) -> Result<()> {
        self.model().set_metadata(metadata)
    }

    fn to_json(&self) -> Result<JsonValue> {
        self.model().to_json()
    }

    fn undo(&self) -> Result<bool> {
        self.model().undo()
    }

    fn redo(&self) -> Result<bool> {
        self.model().redo()
    }

    fn can_undo(&self) -> bool {
        self.model().can_undo()
    }

    fn can_redo(&self) -> bool {
        self.model().can_redo()
    }

    fn clear_undo_history(&self) {
        self.model().clear_undo_history()
    }

    fn subscribe(&self) -> broadcast::Receiver<CellChange> {
        self.model().subscribe()
    }

    fn is_standalone(&self) -> bool {
        self.model().is_standalone()
    }

    fn notebook(&self) -> Option<NotebookModel> {
        self.model().notebook()
    }

    fn dispose(&self) {
        self.model().dispose()
    }

    fn is_disposed(&self) -> bool {
        self.model().is_disposed()
    }
}

/// A code cell.
#[derive(Clone, Debug)]
pub struct CodeCell {
    model: CellModel,
}

impl CodeCell {
    /// An unbound cell without undo history, ready to be inserted.
    pub fn create(id: Option<String>) -> Result<Self> {
        let seed = CellSeed::new(CellType::Code, id);
        let model = CellModel::build(CellType::Code, seed.into_prelim(), false, &DocConfig::default())?;
        Ok(Self { model })
    }

    /// A cell with its own document and undo history.
    pub fn create_standalone(id: Option<String>) -> Result<Self> {
        let seed = CellSeed::new(CellType::Code, id);
        let model = CellModel::build(CellType::Code, seed.into_prelim(), true, &DocConfig::default())?;
        Ok(Self { model })
    }

    pub fn execution_count(&self) -> Result<Option<i64>> {
        self.model.execution_count()
    }

    pub fn set_execution_count(&self, count: Option<i64>) -> Result<()> {
        self.model.set_execution_count(count)
    }

    pub fn outputs(&self) -> Result<Vec<JsonValue>> {
        self.model.outputs()
    }

    /// Replace all outputs. Not recorded in the undo history.
    pub fn set_outputs(&self, outputs: Vec<JsonValue>) -> Result<()> {
        self.model.set_outputs(outputs)
    }

    /// Replace outputs `[start, end)`. Not recorded in the undo history.
    pub fn update_outputs(&self, start: usize, end: usize, outputs: Vec<JsonValue>) -> Result<()> {
        self.model.update_outputs(start, end, outputs)
    }
}

impl SharedCell for CodeCell {
    fn model(&self) -> &CellModel {
        &self.model
    }
}

/// A markdown cell.
#[derive(Clone, Debug)]
pub struct MarkdownCell {
    model: CellModel,
}

impl MarkdownCell {
    pub fn create(id: Option<String>) -> Result<Self> {
        let seed = CellSeed::new(CellType::Markdown, id);
        let model = CellModel::build(CellType::Markdown, seed.into_prelim(), false, &DocConfig::default())?;
        Ok(Self { model })
    }

    pub fn create_standalone(id: Option<String>) -> Result<Self> {
        let seed = CellSeed::new(CellType::Markdown, id);
        let model = CellModel::build(CellType::Markdown, seed.into_prelim(), true, &DocConfig::default())?;
        Ok(Self { model })
    }

    pub fn attachments(&self) -> Result<Option<JsonValue>> {
        self.model.attachments()
    }

    /// `None` removes the attachments.
    pub fn set_attachments(&self, attachments: Option<JsonValue>) -> Result<()> {
        self.model.set_attachments(attachments)
    }
}

impl SharedCell for MarkdownCell {
    fn model(&self) -> &CellModel {
        &self.model
    }
}

/// A raw cell.
#[derive(Clone, Debug)]
pub struct RawCell {
    model: CellModel,
}

impl RawCell {
    pub fn create(id: Option<String>) -> Result<Self> {
        let seed = CellSeed::new(CellType::Raw, id);
        let model = CellModel::build(CellType::Raw, seed.into_prelim(), false, &DocConfig::default())?;
        Ok(Self { model })
    }

    pub fn create_standalone(id: Option<String>) -> Result<Self> {
        let seed = CellSeed::new(CellType::Raw, id);
        let model = CellModel::build(CellType::Raw, seed.into_prelim(), true, &DocConfig::default())?;
        Ok(Self { model })
    }

    pub fn attachments(&self) -> Result<Option<JsonValue>> {
        self.model.attachments()
    }

    /// `None` removes the attachments.
    pub fn set_attachments(&self, attachments: Option<JsonValue>) -> Result<()> {
        self.model.set_attachments(attachments)
    }
}

impl SharedCell for RawCell {
    fn model(&self) -> &CellModel {
        &self.model
    }
}

/// Any cell.
#[derive(Clone, Debug)]
pub enum Cell {
    Code(CodeCell),
    Markdown(MarkdownCell),
    Raw(RawCell),
}

impl Cell {
    pub(crate) fn from_model(model: CellModel) -> Self {
        match model.cell_type() {
            CellType::Code => Cell::Code(CodeCell { model }),
            CellType::Markdown => Cell::Markdown(MarkdownCell { model }),
            CellType::Raw => Cell::Raw(RawCell { model }),
        }
    }

    pub fn as_code(&self) -> Option<&CodeCell> {
        match self {
            Cell::Code(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn as_markdown(&self) -> Option<&MarkdownCell> {
        match self {
            Cell::Markdown(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawCell> {
        match self {
            Cell::Raw(cell) => Some(cell),
            _ => None,
        }
    }

    /// Attachments of a markdown or raw cell; code cells have none.
    pub fn attachments(&self) -> Result<Option<JsonValue>> {
        match self {
            Cell::Code(_) => Ok(None),
            Cell::Markdown(cell) => cell.attachments(),
            Cell::Raw(cell) => cell.attachments(),
        }
    }

    /// A standalone copy with the same id and content.
    pub fn clone_detached(&self) -> Result<Cell> {
        self.model().clone_detached()
    }

    /// Whether both handles wrap the same cell.
    pub fn ptr_eq(&self, other: &Cell) -> bool {
        self.model().ptr_eq(other.model())
    }
}

impl SharedCell for Cell {
    fn model(&self) -> &CellModel {
        match self {
            Cell::Code(cell) => &cell.model,
            Cell::Markdown(cell) => &cell.model,
            Cell::Raw(cell) => &cell.model,
        }
    }
}

impl From<CodeCell> for Cell {
    fn from(cell: CodeCell) -> Self {
        Cell::Code(cell)
    }
}

impl From<MarkdownCell> for Cell {
    fn from(cell: MarkdownCell) -> Self {
        Cell::Markdown(cell)
    }
}

impl From<RawCell> for Cell {
    fn from(cell: RawCell) -> Self {
        Cell::Raw(cell)
    }
}

/// Wrap a cell map found in `doc`, picking the wrapper from its stored
/// `cell_type`.
pub fn create_cell_from_type(doc: &Doc, map: &SharedMap) -> Result<Cell> {
    CellModel::wrap(doc, map.clone(), DocConfig::default().event_capacity).map(Cell::from_model)
}

/// A standalone cell of the given type.
pub fn create_standalone_cell(cell_type: CellType, id: Option<String>) -> Result<Cell> {
    Ok(match cell_type {
        CellType::Code => CodeCell::create_standalone(id)?.into(),
        CellType::Markdown => MarkdownCell::create_standalone(id)?.into(),
        CellType::Raw => RawCell::create_standalone(id)?.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_type_parse() {
        assert_eq!("code".parse::<CellType>().unwrap(), CellType::Code);
        assert_eq!(CellType::Markdown.to_string(), "markdown");
        assert_eq!(
            "heading".parse::<CellType>(),
            Err(DocError::UnknownCellType("heading".to_string()))
        );
    }

    #[test]
    fn test_code_cell_defaults() {
        let cell = CodeCell::create(Some("abc".to_string())).unwrap();

        assert!(!cell.is_standalone());
        assert_eq!(cell.id().unwrap(), "abc");
        assert_eq!(cell.execution_count().unwrap(), None);
        assert_eq!(
            cell.to_json().unwrap(),
            json!({
                "id": "abc",
                "cell_type": "code",
                "source": "",
                "metadata": {},
                "outputs": [],
                "execution_count": null
            })
        );
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RawCell::create(None).unwrap();
        let b = RawCell::create(None).unwrap();
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn test_standalone_undo_redo() {
        let cell = create_standalone_cell(CellType::Markdown, None).unwrap();
        assert!(cell.is_standalone());
        assert!(!cell.can_undo());

        cell.set_source("# Title").unwrap();
        assert!(cell.can_undo());
        cell.update_source(2, 7, "Heading").unwrap();
        assert_eq!(cell.source().unwrap(), "# Heading");

        cell.undo().unwrap();
        assert_eq!(cell.source().unwrap(), "# Title");
        cell.redo().unwrap();
        assert_eq!(cell.source().unwrap(), "# Heading");
    }

    #[test]
    fn test_unbound_cell_has_no_history() {
        let cell = CodeCell::create(None).unwrap();
        cell.set_source("x").unwrap();
        assert!(!cell.can_undo());
        assert!(!cell.undo().unwrap());
    }

    #[test]
    fn test_attachments() {
        let cell = MarkdownCell::create_standalone(None).unwrap();
        assert_eq!(cell.attachments().unwrap(), None);

        let attachments = json!({"image.png": {"image/png": "iVBOR"}});
        cell.set_attachments(Some(attachments.clone())).unwrap();
        assert_eq!(cell.attachments().unwrap(), Some(attachments.clone()));
        assert_eq!(cell.to_json().unwrap()["attachments"], attachments);

        cell.set_attachments(None).unwrap();
        assert_eq!(cell.attachments().unwrap(), None);
        assert!(cell.to_json().unwrap().get("attachments").is_none());
    }

    #[test]
    fn test_outputs_are_untracked() {
        let cell = CodeCell::create_standalone(None).unwrap();
        cell.set_outputs(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})])
            .unwrap();
        assert!(!cell.can_undo());

        cell.update_outputs(1, 2, vec![json!({"n": 9})]).unwrap();
        assert_eq!(
            cell.outputs().unwrap(),
            vec![json!({"n": 1}), json!({"n": 9}), json!({"n": 3})]
        );

        // An end past the length replaces through the end
        cell.update_outputs(2, 10, vec![json!({"n": 4}), json!({"n": 5})])
            .unwrap();
        assert_eq!(cell.outputs().unwrap().len(), 4);

        assert!(matches!(
            cell.update_outputs(7, 8, vec![]),
            Err(DocError::IndexOutOfBounds { .. })
        ));
        assert!(!cell.can_undo());
    }

    #[test]
    fn test_change_events() {
        let cell = CodeCell::create_standalone(None).unwrap();
        let mut changes = cell.subscribe();

        cell.set_source("abc").unwrap();
        let change = changes.try_recv().unwrap();
        assert_eq!(change.source_change, Some(vec![Delta::Insert("abc".to_string())]));
        assert!(change.metadata_change.is_none());

        cell.set_execution_count(Some(3)).unwrap();
        let change = changes.try_recv().unwrap();
        assert_eq!(
            change.execution_count_change,
            Some(ValueChange {
                old_value: Some(JsonValue::Null),
                new_value: Some(json!(3))
            })
        );

        // Same value: no transaction, no event
        cell.set_execution_count(Some(3)).unwrap();
        assert!(changes.try_recv().is_err());

        cell.set_metadata(json!({"collapsed": true})).unwrap();
        let change = changes.try_recv().unwrap();
        assert_eq!(
            change.metadata_change.unwrap().new_value,
            Some(json!({"collapsed": true}))
        );

        cell.set_outputs(vec![json!({"output_type": "stream"})]).unwrap();
        let change = changes.try_recv().unwrap();
        assert_eq!(
            change.outputs_change,
            Some(vec![Delta::Insert(vec![json!({"output_type": "stream"})])])
        );
    }

    #[test]
    fn test_change_serializes_camel_case() {
        let change = CellChange {
            execution_count_change: Some(ValueChange {
                old_value: None,
                new_value: Some(json!(1)),
            }),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"executionCountChange": {"oldValue": null, "newValue": 1}})
        );
    }

    #[test]
    fn test_clone_detached() {
        let cell = CodeCell::create(Some("c1".to_string())).unwrap();
        cell.set_source("print(1)").unwrap();
        cell.set_execution_count(Some(2)).unwrap();
        cell.set_outputs(vec![json!({"output_type": "execute_result"})])
            .unwrap();

        let copy = Cell::from(cell.clone()).clone_detached().unwrap();
        assert!(copy.is_standalone());
        assert_eq!(copy.to_json().unwrap(), cell.to_json().unwrap());

        copy.set_source("changed").unwrap();
        assert_eq!(cell.source().unwrap(), "print(1)");
    }

    #[test]
    fn test_factory_dispatch() {
        let doc = Doc::new();
        let cells = doc.get_or_insert_array("cells");
        let seeds = vec![
            CellSeed::new(CellType::Code, None).into_prelim(),
            CellSeed::new(CellType::Raw, None).into_prelim(),
            Prelim::Map(vec![("cell_type".to_string(), Prelim::Json(json!("heading")))]),
        ];
        doc.transact_mut(Origin::Untracked, |txn| cells.insert(txn, 0, seeds))
            .unwrap();

        let maps: Vec<SharedMap> = doc
            .read(|txn| cells.to_vec(txn))
            .unwrap()
            .into_iter()
            .filter_map(|v| v.as_map().cloned())
            .collect();

        let code = create_cell_from_type(&doc, &maps[0]).unwrap();
        assert!(code.as_code().is_some());
        assert_eq!(code.as_code().unwrap().outputs().unwrap(), Vec::<JsonValue>::new());

        let raw = create_cell_from_type(&doc, &maps[1]).unwrap();
        assert_eq!(raw.attachments().unwrap(), None);
        assert!(raw.as_raw().is_some());

        assert_eq!(
            create_cell_from_type(&doc, &maps[2]).unwrap_err(),
            DocError::UnknownCellType("heading".to_string())
        );
    }

    #[test]
    fn test_disposed_cell() {
        let cell = CodeCell::create(None).unwrap();
        cell.dispose();
        cell.dispose();

        assert!(cell.is_disposed());
        assert_eq!(cell.id(), Err(DocError::Disposed("cell")));
        assert_eq!(cell.set_source("x"), Err(DocError::Disposed("cell")));
    }
}
