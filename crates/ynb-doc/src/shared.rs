//! Handles to shared types.
//!
//! A handle is just the id of a shared type; reads take any transaction
//! and writes take a [`TransactionMut`]. Offsets into text count Unicode
//! scalar values.

use crate::error::{DocError, Result};
use crate::transaction::{ReadTxn, TransactionMut};
use crate::value::{BranchId, BranchKind, Prelim, Value};
use serde_json::Value as JsonValue;

/// Top-level types that were never written read as empty.
fn or_empty<T: Default>(branch: &BranchId, result: Result<T>) -> Result<T> {
    match result {
        Err(DocError::UnknownBranch(_)) if matches!(branch, BranchId::Root(_)) => Ok(T::default()),
        other => other,
    }
}

/// Collaborative text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SharedText {
    branch: BranchId,
}

impl SharedText {
    pub(crate) fn new(branch: BranchId) -> Self {
        Self { branch }
    }

    pub fn branch(&self) -> &BranchId {
        &self.branch
    }

    pub fn len<T: ReadTxn>(&self, txn: &T) -> Result<usize> {
        or_empty(&self.branch, txn.store().text(&self.branch).map(|rga| rga.len()))
    }

    pub fn is_empty<T: ReadTxn>(&self, txn: &T) -> Result<bool> {
        Ok(self.len(txn)? == 0)
    }

    pub fn get_string<T: ReadTxn>(&self, txn: &T) -> Result<String> {
        or_empty(
            &self.branch,
            txn.store().text(&self.branch).map(|rga| rga.iter().collect()),
        )
    }

    pub fn insert(&self, txn: &mut TransactionMut<'_>, index: usize, text: &str) -> Result<()> {
        txn.insert_text(&self.branch, index, text)
    }

    pub fn push(&self, txn: &mut TransactionMut<'_>, text: &str) -> Result<()> {
        let len = self.len(txn)?;
        self.insert(txn, len, text)
    }

    pub fn delete(&self, txn: &mut TransactionMut<'_>, index: usize, len: usize) -> Result<()> {
        txn.delete_range(&self.branch, BranchKind::Text, index, len)
    }

    /// Replace `[start, end)` with `text`.
    ///
    /// The new text is inserted before the old range is removed, so a
    /// concurrent insert at `start` ends up after the replacement.
    pub fn update(&self, txn: &mut TransactionMut<'_>, start: usize, end: usize, text: &str) -> Result<()> {
        self.insert(txn, start, text)?;
        self.delete(txn, start + text.chars().count(), end.saturating_sub(start))
    }

    /// Replace the whole content.
    pub fn set(&self, txn: &mut TransactionMut<'_>, text: &str) -> Result<()> {
        let len = self.len(txn)?;
        self.delete(txn, 0, len)?;
        self.insert(txn, 0, text)
    }
}

/// Collaborative list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SharedArray {
    branch: BranchId,
}

impl SharedArray {
    pub(crate) fn new(branch: BranchId) -> Self {
        Self { branch }
    }

    pub fn branch(&self) -> &BranchId {
        &self.branch
    }

    pub fn len<T: ReadTxn>(&self, txn: &T) -> Result<usize> {
        or_empty(&self.branch, txn.store().array(&self.branch).map(|rga| rga.len()))
    }

    pub fn is_empty<T: ReadTxn>(&self, txn: &T) -> Result<bool> {
        Ok(self.len(txn)? == 0)
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, index: usize) -> Result<Option<Value>> {
        let store = txn.store();
        or_empty(
            &self.branch,
            store
                .array(&self.branch)
                .map(|rga| rga.iter().nth(index).map(|slot| store.slot_value(slot))),
        )
    }

    pub fn to_vec<T: ReadTxn>(&self, txn: &T) -> Result<Vec<Value>> {
        let store = txn.store();
        or_empty(
            &self.branch,
            store
                .array(&self.branch)
                .map(|rga| rga.iter().map(|slot| store.slot_value(slot)).collect()),
        )
    }

    /// Deep JSON copy of the elements.
    pub fn to_json<T: ReadTxn>(&self, txn: &T) -> Result<Vec<JsonValue>> {
        let store = txn.store();
        or_empty(
            &self.branch,
            store
                .array(&self.branch)
                .map(|rga| rga.iter().map(|slot| store.slot_json(slot)).collect()),
        )
    }

    pub fn insert(&self, txn: &mut TransactionMut<'_>, index: usize, values: Vec<Prelim>) -> Result<()> {
        txn.insert_values(&self.branch, index, values)
    }

    pub fn push(&self, txn: &mut TransactionMut<'_>, value: Prelim) -> Result<()> {
        let len = self.len(txn)?;
        self.insert(txn, len, vec![value])
    }

    pub fn delete(&self, txn: &mut TransactionMut<'_>, index: usize, len: usize) -> Result<()> {
        txn.delete_range(&self.branch, BranchKind::Array, index, len)
    }
}

/// Collaborative key-value map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SharedMap {
    branch: BranchId,
}

impl SharedMap {
    pub(crate) fn new(branch: BranchId) -> Self {
        Self { branch }
    }

    pub fn branch(&self) -> &BranchId {
        &self.branch
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, key: &str) -> Result<Option<Value>> {
        let store = txn.store();
        or_empty(
            &self.branch,
            store
                .map(&self.branch)
                .map(|map| map.get(key).map(|slot| store.slot_value(slot))),
        )
    }

    /// Deep JSON copy of one entry.
    pub fn get_json<T: ReadTxn>(&self, txn: &T, key: &str) -> Result<Option<JsonValue>> {
        let store = txn.store();
        or_empty(
            &self.branch,
            store
                .map(&self.branch)
                .map(|map| map.get(key).map(|slot| store.slot_json(slot))),
        )
    }

    pub fn contains_key<T: ReadTxn>(&self, txn: &T, key: &str) -> Result<bool> {
        or_empty(
            &self.branch,
            txn.store().map(&self.branch).map(|map| map.contains_key(key)),
        )
    }

    pub fn keys<T: ReadTxn>(&self, txn: &T) -> Result<Vec<String>> {
        or_empty(
            &self.branch,
            txn.store()
                .map(&self.branch)
                .map(|map| map.keys().map(str::to_string).collect()),
        )
    }

    pub fn len<T: ReadTxn>(&self, txn: &T) -> Result<usize> {
        or_empty(&self.branch, txn.store().map(&self.branch).map(|map| map.len()))
    }

    /// Deep JSON copy of the whole map.
    pub fn to_json<T: ReadTxn>(&self, txn: &T) -> Result<JsonValue> {
        let branch = &self.branch;
        let store = txn.store();
        match store.map(branch) {
            Ok(_) => Ok(store.branch_json(branch)),
            Err(DocError::UnknownBranch(_)) if matches!(branch, BranchId::Root(_)) => {
                Ok(JsonValue::Object(Default::default()))
            }
            Err(err) => Err(err),
        }
    }

    /// Deep copy of the content, ready to be written elsewhere.
    pub fn to_prelim<T: ReadTxn>(&self, txn: &T) -> Result<Prelim> {
        let store = txn.store();
        store.map(&self.branch)?;
        Ok(store.branch_prelim(&self.branch))
    }

    pub fn set(&self, txn: &mut TransactionMut<'_>, key: &str, value: impl Into<Prelim>) -> Result<()> {
        txn.map_set(&self.branch, key, value.into())
    }

    /// Remove a key. Returns false if it was not set.
    pub fn remove(&self, txn: &mut TransactionMut<'_>, key: &str) -> Result<bool> {
        txn.map_remove(&self.branch, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocConfig;
    use crate::doc::{Doc, Origin};
    use serde_json::json;

    fn doc() -> Doc {
        Doc::with_config(&DocConfig::builder().client_id(1).build())
    }

    #[test]
    fn test_text_update_replaces_range() {
        let doc = doc();
        let text = doc.get_or_insert_text("t");
        doc.transact_mut(Origin::local(), |txn| {
            text.insert(txn, 0, "hello world")?;
            text.update(txn, 6, 11, "rust")
        })
        .unwrap();

        assert_eq!(doc.read(|txn| text.get_string(txn)).unwrap(), "hello rust");
    }

    #[test]
    fn test_text_unicode_offsets() {
        let doc = doc();
        let text = doc.get_or_insert_text("t");
        doc.transact_mut(Origin::local(), |txn| {
            text.insert(txn, 0, "héllo")?;
            text.delete(txn, 1, 1)?;
            text.push(txn, "!")
        })
        .unwrap();

        assert_eq!(doc.read(|txn| text.get_string(txn)).unwrap(), "hllo!");
        assert_eq!(doc.read(|txn| text.len(txn)).unwrap(), 5);
    }

    #[test]
    fn test_delete_past_end_fails() {
        let doc = doc();
        let text = doc.get_or_insert_text("t");
        let result = doc.transact_mut(Origin::local(), |txn| {
            text.insert(txn, 0, "ab")?;
            text.delete(txn, 1, 5)
        });

        assert_eq!(result, Err(DocError::IndexOutOfBounds { index: 6, length: 2 }));
    }

    #[test]
    fn test_set_text() {
        let doc = doc();
        let text = doc.get_or_insert_text("t");
        doc.transact_mut(Origin::local(), |txn| text.insert(txn, 0, "old"))
            .unwrap();
        doc.transact_mut(Origin::local(), |txn| text.set(txn, "new content"))
            .unwrap();

        assert_eq!(doc.read(|txn| text.get_string(txn)).unwrap(), "new content");
    }

    #[test]
    fn test_array_nested_values() {
        let doc = doc();
        let list = doc.get_or_insert_array("list");
        doc.transact_mut(Origin::local(), |txn| {
            list.insert(
                txn,
                0,
                vec![
                    json!(1).into(),
                    Prelim::Text("abc".into()),
                    Prelim::Array(vec![json!("x").into()]),
                ],
            )
        })
        .unwrap();

        doc.read(|txn| {
            assert_eq!(list.len(txn)?, 3);
            assert_eq!(list.get(txn, 0)?, Some(Value::Json(json!(1))));
            let text = list.get(txn, 1)?.and_then(|v| v.as_text().cloned()).unwrap();
            assert_eq!(text.get_string(txn)?, "abc");
            assert_eq!(list.get(txn, 3)?, None);
            assert_eq!(list.to_json(txn)?, vec![json!(1), json!("abc"), json!(["x"])]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_map_set_get_remove() {
        let doc = doc();
        let map = doc.get_or_insert_map("m");
        doc.transact_mut(Origin::local(), |txn| {
            map.set(txn, "a", json!({"nested": [1, 2]}))?;
            map.set(txn, "b", Prelim::Text("text".into()))
        })
        .unwrap();

        doc.read(|txn| {
            assert_eq!(map.len(txn)?, 2);
            assert_eq!(map.keys(txn)?, vec!["a".to_string(), "b".to_string()]);
            assert_eq!(map.get_json(txn, "b")?, Some(json!("text")));
            assert_eq!(map.to_json(txn)?, json!({"a": {"nested": [1, 2]}, "b": "text"}));
            Ok(())
        })
        .unwrap();

        let removed = doc
            .transact_mut(Origin::local(), |txn| {
                let first = map.remove(txn, "a")?;
                let second = map.remove(txn, "a")?;
                Ok((first, second))
            })
            .unwrap();
        assert_eq!(removed, (true, false));
        assert!(!doc.read(|txn| map.contains_key(txn, "a")).unwrap());
    }

    #[test]
    fn test_kind_mismatch() {
        let doc = doc();
        let text = doc.get_or_insert_text("shared");
        let as_map = SharedMap::new(text.branch().clone());

        let result = doc.transact_mut(Origin::local(), |txn| as_map.set(txn, "k", json!(1)));
        assert!(matches!(result, Err(DocError::TypeMismatch { .. })));
    }

    #[test]
    fn test_unwritten_root_reads_empty() {
        let doc = doc();
        let list = SharedArray::new(BranchId::root("never"));
        assert_eq!(doc.read(|txn| list.len(txn)).unwrap(), 0);
        assert!(doc.read(|txn| list.to_vec(txn)).unwrap().is_empty());
    }
}
