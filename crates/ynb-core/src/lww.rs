//! Last-Write-Wins map.
//!
//! Each key holds the write with the highest [`ItemId`]; removals are
//! writes of `None` so that a later concurrent set can still win over them.

use crate::id::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The winning write for one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LwwEntry<V> {
    /// The value, or `None` if the key was removed.
    pub value: Option<V>,
    /// Identifier of the write; higher wins.
    pub stamp: ItemId,
}

/// Outcome of a write.
#[derive(Clone, Debug, PartialEq)]
pub enum SetOutcome<V> {
    /// The write won. Carries the entry it replaced.
    Applied { previous: Option<LwwEntry<V>> },
    /// A newer (or identical) write is already present.
    Stale,
}

/// A map where every key resolves concurrent writes by stamp.
#[derive(Clone, Debug, PartialEq)]
pub struct LwwMap<V> {
    entries: BTreeMap<String, LwwEntry<V>>,
}

impl<V> LwwMap<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Write `value` (or a removal) under `key` if `stamp` beats the current write.
    pub fn set(&mut self, key: impl Into<String>, value: Option<V>, stamp: ItemId) -> SetOutcome<V> {
        let key = key.into();
        if let Some(existing) = self.entries.get(&key) {
            if existing.stamp >= stamp {
                return SetOutcome::Stale;
            }
        }
        let previous = self.entries.insert(key, LwwEntry { value, stamp });
        SetOutcome::Applied { previous }
    }

    /// Put back an entry exactly as it was. Used for rollback.
    pub fn restore(&mut self, key: &str, previous: Option<LwwEntry<V>>) {
        match previous {
            Some(entry) => {
                self.entries.insert(key.to_string(), entry);
            }
            None => {
                self.entries.remove(key);
            }
        }
    }

    /// Current value for a key.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).and_then(|e| e.value.as_ref())
    }

    /// The winning write for a key, removals included.
    pub fn entry(&self, key: &str) -> Option<&LwwEntry<V>> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Live keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Live entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> + '_ {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.value.as_ref().map(|v| (k.as_str(), v)))
    }

    /// All writes, removals included.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &LwwEntry<V>)> + '_ {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for LwwMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_set_get() {
        let mut map = LwwMap::new();
        map.set("a", Some(1), ItemId::new(1, 1));

        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_higher_stamp_wins() {
        let mut map = LwwMap::new();
        map.set("k", Some(10), ItemId::new(1, 5));

        assert!(matches!(map.set("k", Some(20), ItemId::new(2, 4)), SetOutcome::Stale));
        assert_eq!(map.get("k"), Some(&10));

        let outcome = map.set("k", Some(30), ItemId::new(2, 6));
        assert_eq!(
            outcome,
            SetOutcome::Applied {
                previous: Some(LwwEntry {
                    value: Some(10),
                    stamp: ItemId::new(1, 5)
                })
            }
        );
        assert_eq!(map.get("k"), Some(&30));
    }

    #[test]
    fn test_tie_breaks_on_client() {
        let mut a = LwwMap::new();
        let mut b = LwwMap::new();

        a.set("k", Some("a"), ItemId::new(1, 3));
        a.set("k", Some("b"), ItemId::new(2, 3));
        b.set("k", Some("b"), ItemId::new(2, 3));
        b.set("k", Some("a"), ItemId::new(1, 3));

        assert_eq!(a.get("k"), b.get("k"));
        assert_eq!(a.get("k"), Some(&"b"));
    }

    #[test]
    fn test_removal_is_a_write() {
        let mut map = LwwMap::new();
        map.set("k", Some(1), ItemId::new(1, 1));
        map.set("k", None, ItemId::new(1, 2));

        assert_eq!(map.get("k"), None);
        assert!(map.is_empty());
        assert_eq!(map.entries().count(), 1);

        // A concurrent older set does not resurrect the key
        map.set("k", Some(9), ItemId::new(3, 1));
        assert_eq!(map.get("k"), None);
    }

    #[test]
    fn test_restore() {
        let mut map = LwwMap::new();
        map.set("k", Some(1), ItemId::new(1, 1));
        if let SetOutcome::Applied { previous } = map.set("k", Some(2), ItemId::new(1, 2)) {
            map.restore("k", previous);
        }
        assert_eq!(map.get("k"), Some(&1));

        map.restore("k", None);
        assert!(map.entry("k").is_none());
    }
}
