//! Item identifiers and Lamport clocks.
//!
//! Every replicated item (a character, an array element, a map write) is
//! named by the client that created it and a Lamport timestamp. Ordering
//! compares the timestamp first and breaks ties on the client, which gives
//! every replica the same total order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a replica (peer) taking part in a document.
pub type ClientId = u64;

/// Unique identifier of a replicated item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId {
    /// The replica that created this item.
    pub client: ClientId,
    /// Lamport timestamp at creation.
    pub clock: u64,
}

impl ItemId {
    /// The virtual head every sequence starts from.
    pub const ROOT: ItemId = ItemId { client: 0, clock: 0 };

    pub fn new(client: ClientId, clock: u64) -> Self {
        Self { client, clock }
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.clock
            .cmp(&other.clock)
            .then_with(|| self.client.cmp(&other.client))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.client, self.clock)
    }
}

/// Lamport clock owned by one replica.
///
/// `tick` hands out strictly increasing ids; `observe` folds in ids seen
/// from other replicas so that later local ids sort after them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LamportClock {
    client: ClientId,
    time: u64,
}

impl LamportClock {
    pub fn new(client: ClientId) -> Self {
        Self { client, time: 0 }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// The last timestamp handed out or observed.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Advance and return a fresh id.
    pub fn tick(&mut self) -> ItemId {
        self.time += 1;
        ItemId::new(self.client, self.time)
    }

    /// Merge a remote timestamp.
    pub fn observe(&mut self, id: &ItemId) {
        self.time = self.time.max(id.clock);
    }

    /// Rewind to an earlier time. Only valid while none of the ids handed out
    /// after `time` have left the replica.
    pub fn rewind(&mut self, time: u64) {
        self.time = time;
    }
}
