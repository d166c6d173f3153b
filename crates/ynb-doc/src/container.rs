//! Shared container: one document, its undo history and its presence.

use crate::awareness::Awareness;
use crate::config::DocConfig;
use crate::doc::{Doc, Origin};
use crate::error::{DocError, Result};
use crate::transaction::TransactionMut;
use crate::undo::UndoManager;
use crate::update::Update;
use crate::value::BranchId;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Owns a [`Doc`] and the undo history of the edits made through it.
///
/// Edits made with `track = true` are recorded in the history; all others
/// are not.
#[derive(Debug)]
pub struct SharedContainer {
    doc: Doc,
    origin: Origin,
    undo: UndoManager,
    awareness: Awareness,
    disposed: AtomicBool,
}

impl SharedContainer {
    /// Wrap `doc`, recording tracked edits to `scope`.
    pub fn new(doc: Doc, scope: Vec<BranchId>, config: &DocConfig) -> Self {
        let origin = Origin::local();
        let undo = UndoManager::new(&doc, scope, [origin], config.capture_timeout);
        let awareness = Awareness::new(doc.client_id(), &config.awareness);
        Self {
            doc,
            origin,
            undo,
            awareness,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Origin of tracked edits.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    pub fn undo_manager(&self) -> &UndoManager {
        &self.undo
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DocError::Disposed("container"));
        }
        Ok(())
    }

    /// Run `f` as one transaction.
    pub fn transact<R>(&self, track: bool, f: impl FnOnce(&mut TransactionMut<'_>) -> Result<R>) -> Result<R> {
        self.ensure_alive()?;
        let origin = if track { self.origin } else { Origin::Untracked };
        self.doc.transact_mut(origin, f)
    }

    pub fn can_undo(&self) -> bool {
        !self.is_disposed() && self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.is_disposed() && self.undo.can_redo()
    }

    pub fn undo(&self) -> Result<bool> {
        self.ensure_alive()?;
        self.undo.undo()
    }

    pub fn redo(&self) -> Result<bool> {
        self.ensure_alive()?;
        self.undo.redo()
    }

    pub fn clear_undo_history(&self) {
        self.undo.clear();
    }

    pub fn stop_capturing(&self) {
        self.undo.stop_capturing();
    }

    pub fn apply_update(&self, update: &Update) -> Result<()> {
        self.ensure_alive()?;
        self.doc.apply_update(update)
    }

    pub fn encode_state_as_update(&self) -> Result<Update> {
        self.ensure_alive()?;
        self.doc.encode_state_as_update()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<Update> {
        self.doc.subscribe_updates()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release the document. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.undo.clear();
        self.awareness.destroy();
        self.doc.destroy();
        tracing::debug!(client_id = self.doc.client_id(), "Disposed shared container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> (SharedContainer, crate::shared::SharedText) {
        let doc = Doc::with_config(&DocConfig::builder().client_id(1).build());
        let text = doc.get_or_insert_text("source");
        let container = SharedContainer::new(doc, vec![text.branch().clone()], &DocConfig::default());
        (container, text)
    }

    #[test]
    fn test_tracked_and_untracked() {
        let (container, text) = container();
        assert!(!container.can_undo());

        container
            .transact(false, |txn| text.insert(txn, 0, "untracked "))
            .unwrap();
        assert!(!container.can_undo());

        container
            .transact(true, |txn| text.insert(txn, 10, "tracked"))
            .unwrap();
        assert!(container.can_undo());

        container.undo().unwrap();
        let content = container.doc().read(|txn| text.get_string(txn)).unwrap();
        assert_eq!(content, "untracked ");
        assert!(container.can_redo());

        container.clear_undo_history();
        assert!(!container.can_redo());
    }

    #[test]
    fn test_empty_transaction_records_nothing() {
        let (container, _) = container();
        let mut updates = container.subscribe_updates();
        container.transact(true, |_| Ok(())).unwrap();

        assert!(!container.can_undo());
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_dispose() {
        let (container, text) = container();
        container.dispose();
        container.dispose();

        assert!(container.is_disposed());
        assert!(container.awareness().is_destroyed());
        assert_eq!(
            container.transact(true, |txn| text.insert(txn, 0, "x")),
            Err(DocError::Disposed("container"))
        );
        assert_eq!(container.undo(), Err(DocError::Disposed("container")));
    }
}
