//! Plain text files: one shared `source` text and a `state` map.

use crate::config::DocConfig;
use crate::container::SharedContainer;
use crate::doc::{Doc, Subscription};
use crate::error::Result;
use crate::event::{BranchChange, BranchEvent, Delta, MapChange};
use crate::shared::{SharedMap, SharedText};
use crate::update::Update;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// What changed in a file during one transaction.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_change: Option<Vec<Delta<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_change: Option<Vec<MapChange>>,
}

struct FileInner {
    container: SharedContainer,
    source: SharedText,
    state: SharedMap,
    changed: broadcast::Sender<FileChange>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// A collaborative text file.
#[derive(Clone)]
pub struct FileModel {
    inner: Arc<FileInner>,
}

impl fmt::Debug for FileModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileModel")
            .field("doc", self.inner.container.doc())
            .finish()
    }
}

impl Default for FileModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FileModel {
    pub fn new() -> Self {
        Self::with_config(&DocConfig::default())
    }

    pub fn with_config(config: &DocConfig) -> Self {
        let doc = Doc::with_config(config);
        let source = doc.get_or_insert_text("source");
        let state = doc.get_or_insert_map("state");
        let container = SharedContainer::new(doc, vec![source.branch().clone()], config);
        let (changed, _) = broadcast::channel(config.event_capacity.max(1));

        let file = Self {
            inner: Arc::new(FileInner {
                container,
                source,
                state,
                changed,
                subscriptions: Mutex::new(Vec::new()),
            }),
        };
        file.attach_observers();
        file
    }

    fn attach_observers(&self) {
        let doc = self.inner.container.doc();
        let sender = self.inner.changed.clone();
        let source = doc.observe(self.inner.source.branch(), move |events, _| {
            if let Some(delta) = text_delta(events) {
                let _ = sender.send(FileChange {
                    source_change: Some(delta),
                    state_change: None,
                });
            }
        });
        let sender = self.inner.changed.clone();
        let state = doc.observe(self.inner.state.branch(), move |events, _| {
            let changes: Vec<MapChange> = events
                .iter()
                .filter_map(|e| match &e.change {
                    BranchChange::Map(changes) => Some(changes.clone()),
                    _ => None,
                })
                .flatten()
                .collect();
            if !changes.is_empty() {
                let _ = sender.send(FileChange {
                    source_change: None,
                    state_change: Some(changes),
                });
            }
        });
        self.inner.subscriptions.lock().extend([source, state]);
    }

    pub fn container(&self) -> &SharedContainer {
        &self.inner.container
    }

    pub fn doc(&self) -> &Doc {
        self.inner.container.doc()
    }

    pub fn get_source(&self) -> Result<String> {
        let source = &self.inner.source;
        self.doc().read(|txn| source.get_string(txn))
    }

    pub fn set_source(&self, text: &str) -> Result<()> {
        let source = &self.inner.source;
        self.inner.container.transact(true, |txn| source.set(txn, text))
    }

    /// Replace `[start, end)` with `text`.
    pub fn update_source(&self, start: usize, end: usize, text: &str) -> Result<()> {
        let source = &self.inner.source;
        self.inner
            .container
            .transact(true, |txn| source.update(txn, start, end, text))
    }

    pub fn get_state(&self, key: &str) -> Result<Option<JsonValue>> {
        let state = &self.inner.state;
        self.doc().read(|txn| state.get_json(txn, key))
    }

    /// Not recorded in the undo history.
    pub fn set_state(&self, key: &str, value: JsonValue) -> Result<()> {
        let state = &self.inner.state;
        self.inner
            .container
            .transact(false, |txn| state.set(txn, key, value))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileChange> {
        self.inner.changed.subscribe()
    }

    pub fn apply_update(&self, update: &Update) -> Result<()> {
        self.inner.container.apply_update(update)
    }

    pub fn encode_state_as_update(&self) -> Result<Update> {
        self.inner.container.encode_state_as_update()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<Update> {
        self.inner.container.subscribe_updates()
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

    pub fn is_disposed(&self) -> bool {
        self.inner.container.is_disposed()
    }

    pub fn dispose(&self) {
        self.inner.subscriptions.lock().clear();
        self.inner.container.dispose();
    }
}

fn text_delta(events: &[BranchEvent]) -> Option<Vec<Delta<String>>> {
    events.iter().find_map(|e| match &e.change {
        BranchChange::Text(delta) => Some(delta.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocError;
    use serde_json::json;

    #[test]
    fn test_source_edits_and_events() {
        let file = FileModel::new();
        let mut changes = file.subscribe();

        file.set_source("hello world").unwrap();
        file.update_source(6, 11, "there").unwrap();

        assert_eq!(file.get_source().unwrap(), "hello there");
        assert_eq!(
            changes.try_recv().unwrap().source_change,
            Some(vec![Delta::Insert("hello world".to_string())])
        );
        let change = changes.try_recv().unwrap();
        assert_eq!(
            change.source_change,
            Some(vec![
                Delta::Retain(6),
                Delta::Insert("there".to_string()),
                Delta::Delete(5)
            ])
        );
        assert!(change.state_change.is_none());
    }

    #[test]
    fn test_undo_redo() {
        let file = FileModel::new();
        assert!(!file.can_undo());

        file.set_source("abc").unwrap();
        file.update_source(1, 2, "B").unwrap();
        assert!(file.can_undo());

        file.undo().unwrap();
        assert_eq!(file.get_source().unwrap(), "abc");
        file.undo().unwrap();
        assert_eq!(file.get_source().unwrap(), "");
        assert!(file.can_redo());

        file.redo().unwrap();
        file.redo().unwrap();
        assert_eq!(file.get_source().unwrap(), "aBc");
    }

    #[test]
    fn test_state_is_untracked() {
        let file = FileModel::new();
        let mut changes = file.subscribe();

        file.set_state("dirty", json!(true)).unwrap();

        assert_eq!(file.get_state("dirty").unwrap(), Some(json!(true)));
        assert!(!file.can_undo());
        let change = changes.try_recv().unwrap();
        assert_eq!(change.state_change.unwrap()[0].name, "dirty");
        assert_eq!(
            serde_json::to_value(FileChange::default()).unwrap(),
            json!({})
        );
    }

    #[test]
    fn test_replicas_converge() {
        let a = FileModel::new();
        let b = FileModel::new();
        let mut updates = a.subscribe_updates();

        a.set_source("shared").unwrap();
        b.apply_update(&updates.try_recv().unwrap()).unwrap();
        assert_eq!(b.get_source().unwrap(), "shared");
        // Remote edits are not undoable locally
        assert!(!b.can_undo());
    }

    #[test]
    fn test_dispose() {
        let file = FileModel::new();
        file.dispose();
        assert_eq!(file.set_source("x"), Err(DocError::Disposed("container")));
    }
}
