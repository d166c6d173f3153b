//! Shared documents.
//!
//! A [`Doc`] owns the replicated state of one document replica. All edits
//! run in transactions; after each commit the document
//!
//! 1. broadcasts the update produced by a local transaction,
//! 2. lets registered undo managers record the change,
//! 3. calls the observers whose shared types were touched.
//!
//! Observers run after the document lock is released, so they may read
//! the document or open new transactions.

use crate::config::DocConfig;
use crate::error::{DocError, Result};
use crate::event::BranchEvent;
use crate::shared::{SharedArray, SharedMap, SharedText};
use crate::store::DocStore;
use crate::transaction::{CommitRecord, ReadTxn, Transaction, TransactionMut};
use crate::undo::UndoState;
use crate::update::Update;
use crate::value::{BranchId, BranchKind};
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tokio::sync::broadcast;
use ynb_core::ClientId;

/// Who made a change.
///
/// Undo managers track the `Local` origins they are configured with and
/// recognise their own `Undo` origin; `Untracked` changes never reach an
/// undo history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    Local(u64),
    Undo(u64),
    Remote,
    Untracked,
}

impl Origin {
    /// A fresh local origin, distinct from every other.
    pub fn local() -> Self {
        Origin::Local(next_token())
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Origin::Remote)
    }
}

pub(crate) fn next_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Observer callback.
pub type ObserverFn = Arc<dyn Fn(&[BranchEvent], Origin) + Send + Sync>;

struct Observer {
    id: u64,
    target: BranchId,
    deep: bool,
    callback: ObserverFn,
}

pub(crate) struct DocInner {
    store: Mutex<DocStore>,
    /// Held from commit until observers have run, so that observers see
    /// transactions in commit order. Reentrant for observers that write.
    commit_order: ReentrantMutex<()>,
    /// Thread currently inside a transaction, if any.
    active: Mutex<Option<ThreadId>>,
    observers: Mutex<Vec<Observer>>,
    undo_managers: Mutex<Vec<Weak<Mutex<UndoState>>>>,
    updates: broadcast::Sender<Update>,
    destroyed: AtomicBool,
    next_observer: AtomicU64,
    client_id: ClientId,
}

impl DocInner {
    fn is_active_here(&self) -> bool {
        *self.active.lock() == Some(thread::current().id())
    }
}

/// Clears the active-transaction marker when dropped.
pub(crate) struct ActiveGuard<'doc>(&'doc Mutex<Option<ThreadId>>);

impl<'doc> ActiveGuard<'doc> {
    fn enter(slot: &'doc Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        ActiveGuard(slot)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// A document replica.
///
/// Cloning a `Doc` yields another handle to the same replica.
#[derive(Clone)]
pub struct Doc {
    inner: Arc<DocInner>,
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("client_id", &self.inner.client_id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    pub fn new() -> Self {
        Self::with_config(&DocConfig::default())
    }

    pub fn with_config(config: &DocConfig) -> Self {
        let client_id = config.resolve_client_id();
        let (updates, _) = broadcast::channel(config.event_capacity.max(1));
        tracing::debug!(client_id, "Created document");
        Self {
            inner: Arc::new(DocInner {
                store: Mutex::new(DocStore::new(client_id)),
                commit_order: ReentrantMutex::new(()),
                active: Mutex::new(None),
                observers: Mutex::new(Vec::new()),
                undo_managers: Mutex::new(Vec::new()),
                updates,
                destroyed: AtomicBool::new(false),
                next_observer: AtomicU64::new(1),
                client_id,
            }),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.client_id
    }

    /// Whether two handles refer to the same replica.
    pub fn ptr_eq(&self, other: &Doc) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn get_or_insert_text(&self, name: &str) -> SharedText {
        self.ensure_root(name, BranchKind::Text);
        SharedText::new(BranchId::root(name))
    }

    pub fn get_or_insert_array(&self, name: &str) -> SharedArray {
        self.ensure_root(name, BranchKind::Array);
        SharedArray::new(BranchId::root(name))
    }

    pub fn get_or_insert_map(&self, name: &str) -> SharedMap {
        self.ensure_root(name, BranchKind::Map);
        SharedMap::new(BranchId::root(name))
    }

    fn ensure_root(&self, name: &str, kind: BranchKind) {
        if self.inner.is_active_here() {
            // The store is locked by this thread; the type is created on
            // its first write instead.
            return;
        }
        if let Err(err) = self.inner.store.lock().ensure_root(&BranchId::root(name), kind) {
            tracing::warn!(name, %err, "Shared type already exists with another kind");
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DocError::Disposed("document"));
        }
        if self.inner.is_active_here() {
            return Err(DocError::NestedTransaction);
        }
        Ok(())
    }

    /// Open a read-only transaction.
    pub fn transact(&self) -> Result<ReadGuard<'_>> {
        self.ensure_usable()?;
        let store = self.inner.store.lock();
        let active = ActiveGuard::enter(&self.inner.active);
        Ok(ReadGuard {
            _active: active,
            txn: Transaction { store },
        })
    }

    /// Run `f` with read access to the document.
    pub fn read<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
        let guard = self.transact()?;
        f(&guard.txn)
    }

    /// Run `f` in a read-write transaction.
    ///
    /// If `f` fails, every change it made is rolled back and the error is
    /// returned; nothing is observed, recorded or broadcast.
    pub fn transact_mut<R>(
        &self,
        origin: Origin,
        f: impl FnOnce(&mut TransactionMut<'_>) -> Result<R>,
    ) -> Result<R> {
        self.ensure_usable()?;
        let _order = self.inner.commit_order.lock();
        let (value, record) = {
            let mut store = self.inner.store.lock();
            let _active = ActiveGuard::enter(&self.inner.active);
            let mut txn = TransactionMut::new(&mut store, origin);
            match f(&mut txn) {
                Ok(value) => (value, txn.commit()),
                Err(err) => {
                    txn.rollback();
                    tracing::debug!(%err, ?origin, "Transaction rolled back");
                    return Err(err);
                }
            }
        };
        self.dispatch(record);
        Ok(value)
    }

    fn dispatch(&self, record: CommitRecord) {
        if let Some(update) = &record.update {
            // No receivers is fine.
            let _ = self.inner.updates.send(update.clone());
        }

        let managers: Vec<Arc<Mutex<UndoState>>> = {
            let mut list = self.inner.undo_managers.lock();
            list.retain(|m| m.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for manager in managers {
            manager.lock().observe(&record);
        }

        if record.events.is_empty() {
            return;
        }
        let observers: Vec<(BranchId, bool, ObserverFn)> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|o| (o.target.clone(), o.deep, o.callback.clone()))
            .collect();
        for (target, deep, callback) in observers {
            let events: Vec<BranchEvent> = record
                .events
                .iter()
                .filter(|e| {
                    if deep {
                        e.is_within(&target)
                    } else {
                        e.target == target
                    }
                })
                .cloned()
                .collect();
            if !events.is_empty() {
                callback(&events, record.origin);
            }
        }
    }

    /// Integrate an update from a peer.
    pub fn apply_update(&self, update: &Update) -> Result<()> {
        self.transact_mut(Origin::Remote, |txn| txn.integrate_update(update))
    }

    /// An update that brings an empty replica to this replica's state.
    pub fn encode_state_as_update(&self) -> Result<Update> {
        let guard = self.transact()?;
        Ok(Update::new(guard.txn.store().encode_state()))
    }

    /// Updates produced by local transactions, for sending to peers.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Update> {
        self.inner.updates.subscribe()
    }

    /// Call `f` after each transaction that changed `branch` itself.
    pub fn observe<F>(&self, branch: &BranchId, f: F) -> Subscription
    where
        F: Fn(&[BranchEvent], Origin) + Send + Sync + 'static,
    {
        self.add_observer(branch, false, Arc::new(f))
    }

    /// Call `f` after each transaction that changed `branch` or anything
    /// nested in it.
    pub fn observe_deep<F>(&self, branch: &BranchId, f: F) -> Subscription
    where
        F: Fn(&[BranchEvent], Origin) + Send + Sync + 'static,
    {
        self.add_observer(branch, true, Arc::new(f))
    }

    fn add_observer(&self, branch: &BranchId, deep: bool, callback: ObserverFn) -> Subscription {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().push(Observer {
            id,
            target: branch.clone(),
            deep,
            callback,
        });
        Subscription {
            doc: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub(crate) fn register_undo_manager(&self, state: &Arc<Mutex<UndoState>>) {
        self.inner.undo_managers.lock().push(Arc::downgrade(state));
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Release observers and undo managers. Later transactions fail.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.observers.lock().clear();
        self.inner.undo_managers.lock().clear();
        tracing::debug!(client_id = self.inner.client_id, "Destroyed document");
    }
}

/// A read transaction together with the lock it holds.
pub struct ReadGuard<'doc> {
    // Cleared before the store lock is released.
    _active: ActiveGuard<'doc>,
    txn: Transaction<'doc>,
}

impl<'doc> std::ops::Deref for ReadGuard<'doc> {
    type Target = Transaction<'doc>;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}

/// Keeps an observer registered; dropping it unsubscribes.
pub struct Subscription {
    doc: Weak<DocInner>,
    id: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.doc.upgrade() {
            inner.observers.lock().retain(|o| o.id != self.id);
        }
    }
}
