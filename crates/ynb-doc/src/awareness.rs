//! Peer presence, exchanged beside the document.
//!
//! Every peer owns one entry: an arbitrary JSON state plus a logical clock
//! that grows with each write. Entries that are not refreshed within the
//! outdated timeout are evicted, so peers must periodically re-announce
//! themselves (see [`Awareness::check_at`] and
//! [`Awareness::spawn_check_loop`]).

use crate::config::AwarenessConfig;
use crate::error::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use ynb_core::ClientId;

/// Clock and freshness of one peer's entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaClientState {
    pub clock: u64,
    /// Milliseconds since the Unix epoch.
    pub last_updated: u64,
}

/// Peers affected by one awareness mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AwarenessChange {
    pub added: Vec<ClientId>,
    pub updated: Vec<ClientId>,
    pub removed: Vec<ClientId>,
}

impl AwarenessChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Where an awareness mutation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AwarenessOrigin {
    Local,
    Timeout,
    Remote,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AwarenessEvent {
    pub change: AwarenessChange,
    pub origin: AwarenessOrigin,
}

/// One entry of an awareness update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AwarenessEntry {
    pub client_id: ClientId,
    pub clock: u64,
    /// `None` announces that the peer left.
    pub state: Option<JsonValue>,
}

/// Awareness entries for transport.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub entries: Vec<AwarenessEntry>,
}

impl AwarenessUpdate {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct AwarenessState {
    client_id: ClientId,
    states: HashMap<ClientId, JsonValue>,
    meta: HashMap<ClientId, MetaClientState>,
    destroyed: bool,
}

impl AwarenessState {
    /// Write the local entry. Returns the change and update payloads.
    fn set_local(&mut self, state: Option<JsonValue>, now: u64) -> (AwarenessChange, AwarenessChange) {
        let client_id = self.client_id;
        let clock = self.meta.get(&client_id).map(|m| m.clock + 1).unwrap_or(0);
        let previous = match &state {
            Some(s) => self.states.insert(client_id, s.clone()),
            None => self.states.remove(&client_id),
        };
        self.meta.insert(
            client_id,
            MetaClientState {
                clock,
                last_updated: now,
            },
        );

        let mut change = AwarenessChange::default();
        let mut update = AwarenessChange::default();
        match (&state, &previous) {
            (None, _) => {
                change.removed.push(client_id);
                update.removed.push(client_id);
            }
            (Some(_), None) => {
                change.added.push(client_id);
                update.added.push(client_id);
            }
            (Some(new), Some(old)) => {
                update.updated.push(client_id);
                if new != old {
                    change.updated.push(client_id);
                }
            }
        }
        (change, update)
    }

    fn remove(&mut self, clients: &[ClientId], now: u64) -> Vec<ClientId> {
        let mut removed = Vec::new();
        for client in clients {
            if self.states.remove(client).is_some() {
                if *client == self.client_id {
                    let clock = self.meta.get(client).map(|m| m.clock + 1).unwrap_or(0);
                    self.meta.insert(
                        *client,
                        MetaClientState {
                            clock,
                            last_updated: now,
                        },
                    );
                }
                removed.push(*client);
            }
        }
        removed
    }
}

struct AwarenessShared {
    state: RwLock<AwarenessState>,
    change_tx: broadcast::Sender<AwarenessEvent>,
    update_tx: broadcast::Sender<AwarenessEvent>,
    config: AwarenessConfig,
}

/// Presence table of one peer.
///
/// Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct Awareness {
    shared: Arc<AwarenessShared>,
}

impl std::fmt::Debug for Awareness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Awareness")
            .field("client_id", &state.client_id)
            .field("peers", &state.states.len())
            .finish()
    }
}

impl Awareness {
    /// Create the table with an empty local state.
    pub fn new(client_id: ClientId, config: &AwarenessConfig) -> Self {
        let (change_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (update_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let mut state = AwarenessState {
            client_id,
            states: HashMap::new(),
            meta: HashMap::new(),
            destroyed: false,
        };
        state.set_local(Some(JsonValue::Object(Default::default())), now_millis());

        Self {
            shared: Arc::new(AwarenessShared {
                state: RwLock::new(state),
                change_tx,
                update_tx,
                config: config.clone(),
            }),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.shared.state.read().client_id
    }

    pub fn local_state(&self) -> Option<JsonValue> {
        let state = self.shared.state.read();
        state.states.get(&state.client_id).cloned()
    }

    /// Snapshot of every known peer's state.
    pub fn states(&self) -> HashMap<ClientId, JsonValue> {
        self.shared.state.read().states.clone()
    }

    pub fn meta(&self) -> HashMap<ClientId, MetaClientState> {
        self.shared.state.read().meta.clone()
    }

    /// Change events: only peers whose state actually changed.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<AwarenessEvent> {
        self.shared.change_tx.subscribe()
    }

    /// Update events: every peer touched, for forwarding to other peers.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<AwarenessEvent> {
        self.shared.update_tx.subscribe()
    }

    fn emit(&self, change: AwarenessChange, update: AwarenessChange, origin: AwarenessOrigin) {
        if !change.is_empty() {
            let _ = self.shared.change_tx.send(AwarenessEvent { change, origin });
        }
        if !update.is_empty() {
            let _ = self.shared.update_tx.send(AwarenessEvent {
                change: update,
                origin,
            });
        }
    }

    /// Replace the local state; `None` announces that this peer left.
    pub fn set_local_state(&self, state: Option<JsonValue>) {
        let (change, update) = self.shared.state.write().set_local(state, now_millis());
        self.emit(change, update, AwarenessOrigin::Local);
    }

    /// Set one field of the local state. Does nothing without a local state.
    pub fn set_local_state_field(&self, field: &str, value: JsonValue) {
        let Some(current) = self.local_state() else {
            return;
        };
        let mut object = match current {
            JsonValue::Object(object) => object,
            _ => Default::default(),
        };
        object.insert(field.to_string(), value);
        self.set_local_state(Some(JsonValue::Object(object)));
    }

    /// Entries for the given peers, as known locally.
    pub fn encode_update(&self, clients: &[ClientId]) -> AwarenessUpdate {
        let state = self.shared.state.read();
        let entries = clients
            .iter()
            .filter_map(|client| {
                state.meta.get(client).map(|meta| AwarenessEntry {
                    client_id: *client,
                    clock: meta.clock,
                    state: state.states.get(client).cloned(),
                })
            })
            .collect();
        AwarenessUpdate { entries }
    }

    /// Merge entries received from a peer.
    ///
    /// An entry wins if its clock is newer than the known one, or equal
    /// with a null state for a peer that is still present.
    pub fn apply_update(&self, update: &AwarenessUpdate, origin: AwarenessOrigin) {
        let now = now_millis();
        let mut change = AwarenessChange::default();
        let mut touched = AwarenessChange::default();
        {
            let mut guard = self.shared.state.write();
            let state = &mut *guard;
            for entry in &update.entries {
                let client = entry.client_id;
                let known = state.meta.get(&client).copied();
                let current = known.map(|m| m.clock).unwrap_or(0);
                let present = state.states.contains_key(&client);
                let accept = current < entry.clock
                    || (current == entry.clock && entry.state.is_none() && present);
                if !accept {
                    continue;
                }

                let mut clock = entry.clock;
                let previous = state.states.get(&client).cloned();
                let outbid = entry.state.is_none() && client == state.client_id && present;
                match &entry.state {
                    None if outbid => {
                        // Still here: outbid the removal.
                        clock += 1;
                    }
                    None => {
                        state.states.remove(&client);
                    }
                    Some(value) => {
                        state.states.insert(client, value.clone());
                    }
                }
                state.meta.insert(
                    client,
                    MetaClientState {
                        clock,
                        last_updated: now,
                    },
                );

                if outbid {
                    touched.updated.push(client);
                    continue;
                }
                match (&entry.state, known) {
                    (Some(_), None) => {
                        change.added.push(client);
                        touched.added.push(client);
                    }
                    (None, Some(_)) => {
                        change.removed.push(client);
                        touched.removed.push(client);
                    }
                    (Some(value), Some(_)) => {
                        if previous.as_ref() != Some(value) {
                            change.updated.push(client);
                        }
                        touched.updated.push(client);
                    }
                    (None, None) => {}
                }
            }
        }
        if !change.is_empty() {
            tracing::trace!(?change, "Applied awareness update");
        }
        self.emit(change, touched, origin);
    }

    /// Drop the given peers' states.
    pub fn remove_states(&self, clients: &[ClientId], origin: AwarenessOrigin) {
        let removed = self.shared.state.write().remove(clients, now_millis());
        let change = AwarenessChange {
            removed,
            ..Default::default()
        };
        self.emit(change.clone(), change, origin);
    }

    /// One tick of the liveness protocol at time `now` (ms since epoch):
    /// renew the local state if it is getting old and evict remote peers
    /// that went quiet.
    pub fn check_at(&self, now: u64) {
        let renew_after = self.shared.config.renew_after.as_millis() as u64;
        let timeout = self.shared.config.outdated_timeout.as_millis() as u64;

        let renew = {
            let state = self.shared.state.read();
            let local = state.states.get(&state.client_id).cloned();
            let last = state.meta.get(&state.client_id).map(|m| m.last_updated);
            match (local, last) {
                (Some(local), Some(last)) if now.saturating_sub(last) >= renew_after => Some(local),
                _ => None,
            }
        };
        if let Some(local) = renew {
            let (change, update) = self.shared.state.write().set_local(Some(local), now);
            self.emit(change, update, AwarenessOrigin::Local);
        }

        let removed = {
            let mut guard = self.shared.state.write();
            let state = &mut *guard;
            let stale: Vec<ClientId> = state
                .meta
                .iter()
                .filter(|(client, meta)| {
                    **client != state.client_id
                        && now.saturating_sub(meta.last_updated) >= timeout
                        && state.states.contains_key(*client)
                })
                .map(|(client, _)| *client)
                .collect();
            for client in &stale {
                state.states.remove(client);
            }
            stale
        };
        if !removed.is_empty() {
            tracing::debug!(?removed, "Evicted outdated awareness states");
            let change = AwarenessChange {
                removed,
                ..Default::default()
            };
            self.emit(change.clone(), change, AwarenessOrigin::Timeout);
        }
    }

    /// Run [`check_at`](Self::check_at) every check interval on the tokio
    /// runtime until this awareness is destroyed or dropped.
    pub fn spawn_check_loop(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.config.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let awareness = Awareness { shared };
                if awareness.is_destroyed() {
                    break;
                }
                awareness.check_at(now_millis());
            }
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.state.read().destroyed
    }

    /// Announce departure and stop the check loop.
    pub fn destroy(&self) {
        {
            let mut state = self.shared.state.write();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        self.set_local_state(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn awareness(client: ClientId) -> Awareness {
        Awareness::new(client, &AwarenessConfig::default())
    }

    fn entry(client: ClientId, clock: u64, state: Option<JsonValue>) -> AwarenessUpdate {
        AwarenessUpdate {
            entries: vec![AwarenessEntry {
                client_id: client,
                clock,
                state,
            }],
        }
    }

    #[test]
    fn test_initial_local_state() {
        let a = awareness(1);
        assert_eq!(a.local_state(), Some(json!({})));
        assert_eq!(a.meta()[&1].clock, 0);
    }

    #[test]
    fn test_local_writes_bump_clock() {
        let a = awareness(1);
        let mut changes = a.subscribe_changes();
        let mut updates = a.subscribe_updates();

        a.set_local_state_field("user", json!({"name": "ada"}));
        assert_eq!(a.meta()[&1].clock, 1);
        assert_eq!(changes.try_recv().unwrap().change.updated, vec![1]);
        updates.try_recv().unwrap();

        // Same state again: an update for peers, but no change
        a.set_local_state(a.local_state());
        assert_eq!(a.meta()[&1].clock, 2);
        assert!(changes.try_recv().is_err());
        assert_eq!(updates.try_recv().unwrap().change.updated, vec![1]);

        a.set_local_state(None);
        assert_eq!(changes.try_recv().unwrap().change.removed, vec![1]);
        assert!(a.states().is_empty());
    }

    #[test]
    fn test_remote_clock_must_grow() {
        let a = awareness(1);
        a.apply_update(&entry(2, 5, Some(json!({"v": 1}))), AwarenessOrigin::Remote);
        assert_eq!(a.states()[&2], json!({"v": 1}));

        a.apply_update(&entry(2, 5, Some(json!({"v": 2}))), AwarenessOrigin::Remote);
        a.apply_update(&entry(2, 4, Some(json!({"v": 3}))), AwarenessOrigin::Remote);
        assert_eq!(a.states()[&2], json!({"v": 1}));

        a.apply_update(&entry(2, 6, Some(json!({"v": 4}))), AwarenessOrigin::Remote);
        assert_eq!(a.states()[&2], json!({"v": 4}));
    }

    #[test]
    fn test_remote_null_with_same_clock_removes() {
        let a = awareness(1);
        a.apply_update(&entry(2, 3, Some(json!({}))), AwarenessOrigin::Remote);
        let mut changes = a.subscribe_changes();

        a.apply_update(&entry(2, 3, None), AwarenessOrigin::Remote);

        assert!(!a.states().contains_key(&2));
        let event = changes.try_recv().unwrap();
        assert_eq!(event.change.removed, vec![2]);
        assert_eq!(event.origin, AwarenessOrigin::Remote);
    }

    #[test]
    fn test_remote_removal_of_self_is_outbid() {
        let a = awareness(1);
        let mut changes = a.subscribe_changes();
        let mut updates = a.subscribe_updates();
        a.apply_update(&entry(1, 4, None), AwarenessOrigin::Remote);

        assert_eq!(a.local_state(), Some(json!({})));
        assert_eq!(a.meta()[&1].clock, 5);
        assert!(changes.try_recv().is_err());
        assert_eq!(updates.try_recv().unwrap().change.updated, vec![1]);
    }

    #[test]
    fn test_check_evicts_outdated_and_renews_local() {
        let a = awareness(1);
        a.apply_update(&entry(2, 1, Some(json!({}))), AwarenessOrigin::Remote);
        let mut changes = a.subscribe_changes();
        let mut updates = a.subscribe_updates();
        let start = a.meta()[&2].last_updated;

        a.check_at(start + 1_000);
        assert!(a.states().contains_key(&2));

        a.check_at(start + 30_000);
        assert!(!a.states().contains_key(&2));
        let event = changes.try_recv().unwrap();
        assert_eq!(event.change.removed, vec![2]);
        assert_eq!(event.origin, AwarenessOrigin::Timeout);

        // The local state was renewed before eviction
        let renewal = updates.try_recv().unwrap();
        assert_eq!(renewal.change.updated, vec![1]);
        assert!(a.states().contains_key(&1));
    }

    #[test]
    fn test_remove_states() {
        let a = awareness(1);
        a.apply_update(&entry(2, 1, Some(json!({}))), AwarenessOrigin::Remote);
        a.remove_states(&[2, 3], AwarenessOrigin::Remote);

        assert_eq!(a.states().len(), 1);
        // Removing a peer locally keeps its clock, so its old entries stay stale
        a.apply_update(&entry(2, 1, Some(json!({}))), AwarenessOrigin::Remote);
        assert!(!a.states().contains_key(&2));
    }

    #[test]
    fn test_exchange_between_peers() {
        let a = awareness(1);
        let b = awareness(2);
        a.set_local_state_field("cursor", json!(4));

        let bytes = a.encode_update(&[1]).encode().unwrap();
        b.apply_update(&AwarenessUpdate::decode(&bytes).unwrap(), AwarenessOrigin::Remote);

        assert_eq!(b.states()[&1], json!({"cursor": 4}));
        assert_eq!(b.meta()[&1].clock, 1);
    }

    #[test]
    fn test_destroy_announces_departure() {
        let a = awareness(1);
        let mut updates = a.subscribe_updates();
        a.destroy();
        a.destroy();

        assert!(a.is_destroyed());
        assert_eq!(a.local_state(), None);
        assert_eq!(updates.try_recv().unwrap().change.removed, vec![1]);
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_check_loop_evicts_quiet_peers() {
        let config = AwarenessConfig::builder()
            .check_interval(Duration::from_millis(10))
            .renew_after(Duration::from_millis(10))
            .outdated_timeout(Duration::from_millis(20))
            .build();
        let a = Awareness::new(1, &config);
        a.apply_update(&entry(2, 1, Some(json!({}))), AwarenessOrigin::Remote);
        let mut changes = a.subscribe_changes();

        let handle = a.spawn_check_loop();
        let event = tokio::time::timeout(Duration::from_secs(5), changes.recv())
            .await
            .expect("eviction within timeout")
            .unwrap();

        assert_eq!(event.change.removed, vec![2]);
        assert_eq!(event.origin, AwarenessOrigin::Timeout);

        a.destroy();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops after destroy")
            .unwrap();
    }
}
