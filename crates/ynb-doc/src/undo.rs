//! Undo/redo history over a scope of shared types.
//!
//! The manager records what tracked transactions inserted, deleted and
//! overwrote inside its scope. Undoing a step deletes what it inserted,
//! re-inserts copies of what it deleted next to the originals, and writes
//! back old map values; the undo itself is recorded on the redo stack.
//!
//! Changes from other origins (peers, untracked edits) are never undone,
//! and since elements keep their identity they need no adjustment of the
//! recorded steps.

use crate::doc::{next_token, Doc, Origin};
use crate::error::Result;
use crate::transaction::{CommitRecord, TrackedItem};
use crate::value::{BranchId, Slot};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ynb_core::ItemId;

/// One undoable step.
#[derive(Clone, Debug, Default)]
pub(crate) struct StackItem {
    pub inserted: Vec<(BranchId, ItemId)>,
    pub deleted: Vec<(BranchId, ItemId)>,
    pub map_changes: Vec<(BranchId, String, Option<Slot>)>,
}

impl StackItem {
    fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.map_changes.is_empty()
    }

    /// Fold a later change into this step. The oldest value of a key wins.
    fn merge(&mut self, later: StackItem) {
        self.inserted.extend(later.inserted);
        self.deleted.extend(later.deleted);
        for (branch, key, old) in later.map_changes {
            let known = self
                .map_changes
                .iter()
                .any(|(b, k, _)| *b == branch && *k == key);
            if !known {
                self.map_changes.push((branch, key, old));
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Idle,
    Undoing,
    Redoing,
}

pub(crate) struct UndoState {
    token: u64,
    scope: Vec<BranchId>,
    tracked: HashSet<Origin>,
    undo_stack: Vec<StackItem>,
    redo_stack: Vec<StackItem>,
    mode: Mode,
    capture_timeout: Duration,
    last_change: Option<Instant>,
}

impl UndoState {
    fn in_scope(&self, branch: &BranchId, path: &[BranchId]) -> bool {
        self.scope
            .iter()
            .any(|s| s == branch || path.contains(s))
    }

    fn scoped(&self, items: &[TrackedItem]) -> Vec<(BranchId, ItemId)> {
        items
            .iter()
            .filter(|i| self.in_scope(&i.branch, &i.path))
            .map(|i| (i.branch.clone(), i.id))
            .collect()
    }

    pub(crate) fn observe(&mut self, record: &CommitRecord) {
        let item = StackItem {
            inserted: self.scoped(&record.inserted),
            deleted: self.scoped(&record.deleted),
            map_changes: record
                .map_changes
                .iter()
                .filter(|c| self.in_scope(&c.branch, &c.path))
                .map(|c| (c.branch.clone(), c.key.clone(), c.old.clone()))
                .collect(),
        };
        if item.is_empty() {
            return;
        }

        match record.origin {
            Origin::Undo(token) if token == self.token => match self.mode {
                Mode::Undoing => self.redo_stack.push(item),
                Mode::Redoing => self.undo_stack.push(item),
                Mode::Idle => {}
            },
            origin if self.tracked.contains(&origin) => {
                let now = Instant::now();
                let merge = self
                    .last_change
                    .map(|t| now.duration_since(t) < self.capture_timeout)
                    .unwrap_or(false);
                if merge {
                    if let Some(last) = self.undo_stack.last_mut() {
                        last.merge(item);
                    } else {
                        self.undo_stack.push(item);
                    }
                } else {
                    self.undo_stack.push(item);
                }
                self.last_change = Some(now);
                self.redo_stack.clear();
            }
            _ => {}
        }
    }
}

/// Undo/redo history for changes made under the tracked origins.
pub struct UndoManager {
    doc: Doc,
    state: Arc<Mutex<UndoState>>,
}

impl fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UndoManager")
            .field("scope", &state.scope)
            .field("undo", &state.undo_stack.len())
            .field("redo", &state.redo_stack.len())
            .finish()
    }
}

impl UndoManager {
    /// Track changes to `scope` (and everything nested in it) made under
    /// any of `tracked`.
    pub fn new(
        doc: &Doc,
        scope: Vec<BranchId>,
        tracked: impl IntoIterator<Item = Origin>,
        capture_timeout: Duration,
    ) -> Self {
        let state = Arc::new(Mutex::new(UndoState {
            token: next_token(),
            scope,
            tracked: tracked.into_iter().collect(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            mode: Mode::Idle,
            capture_timeout,
            last_change: None,
        }));
        doc.register_undo_manager(&state);
        Self {
            doc: doc.clone(),
            state,
        }
    }

    /// The origin of the transactions this manager runs.
    pub fn origin(&self) -> Origin {
        Origin::Undo(self.state.lock().token)
    }

    pub fn add_tracked_origin(&self, origin: Origin) {
        self.state.lock().tracked.insert(origin);
    }

    pub fn can_undo(&self) -> bool {
        !self.state.lock().undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.lock().redo_stack.is_empty()
    }

    /// Undo the latest step. Returns false if there was nothing to undo.
    pub fn undo(&self) -> Result<bool> {
        self.replay(Mode::Undoing)
    }

    /// Redo the latest undone step. Returns false if there was nothing to redo.
    pub fn redo(&self) -> Result<bool> {
        self.replay(Mode::Redoing)
    }

    fn replay(&self, mode: Mode) -> Result<bool> {
        loop {
            let (item, origin) = {
                let mut state = self.state.lock();
                let popped = match mode {
                    Mode::Undoing => state.undo_stack.pop(),
                    _ => state.redo_stack.pop(),
                };
                let Some(item) = popped else {
                    return Ok(false);
                };
                state.mode = mode;
                (item, Origin::Undo(state.token))
            };

            let result = self
                .doc
                .transact_mut(origin, |txn| txn.apply_stack_item(&item));
            {
                let mut state = self.state.lock();
                state.mode = Mode::Idle;
                state.last_change = None;
            }
            // Steps whose effect is already gone are skipped.
            if result? {
                tracing::trace!(?mode, "Replayed history step");
                return Ok(true);
            }
        }
    }

    /// Drop both stacks.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.undo_stack.clear();
        state.redo_stack.clear();
    }

    /// The next tracked change starts a new step even within the capture
    /// timeout.
    pub fn stop_capturing(&self) {
        self.state.lock().last_change = None;
    }
}
