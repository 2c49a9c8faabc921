//! The in-memory write buffer: a sorted map of the most recent write
//! per key, flushed to an SSTable once it crosses the configured size
//! threshold.
//!
//! Simplified to single-version, last-write-wins semantics: unlike a
//! multi-version memtable keyed by `(key, timestamp)`, there is at
//! most one live entry per key here. Ordering between writers is
//! whatever order calls reach the lock; callers needing
//! read-your-writes ordering serialize at the caller (the engine
//! façade holds the write path behind its own lock).

use std::collections::BTreeMap;
use std::sync::RwLock;

/// A key's most recent write: either a value or a tombstone recording
/// a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableEntry {
    Value(Vec<u8>),
    Tombstone,
}

impl MemTableEntry {
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            MemTableEntry::Value(v) => Some(v),
            MemTableEntry::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, MemTableEntry::Tombstone)
    }
}

struct Inner {
    tree: BTreeMap<Vec<u8>, MemTableEntry>,
    approximate_size: usize,
}

/// Rough per-entry overhead charged on top of key/value bytes when
/// estimating memory usage (`BTreeMap` node + enum discriminant).
const ENTRY_OVERHEAD_BYTES: usize = 48;

pub struct MemTable {
    inner: RwLock<Inner>,
    write_buffer_size: usize,
}

impl MemTable {
    pub fn new(write_buffer_size: usize) -> Self {
        MemTable {
            inner: RwLock::new(Inner {
                tree: BTreeMap::new(),
                approximate_size: 0,
            }),
            write_buffer_size,
        }
    }

    fn entry_cost(key: &[u8], entry: &MemTableEntry) -> usize {
        let value_len = entry.as_value().map(|v| v.len()).unwrap_or(0);
        key.len() + value_len + ENTRY_OVERHEAD_BYTES
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut inner = self.inner.write().expect("memtable lock poisoned");
        let new_entry = MemTableEntry::Value(value);
        let added = Self::entry_cost(&key, &new_entry);
        let removed = inner
            .tree
            .get(&key)
            .map(|old| Self::entry_cost(&key, old))
            .unwrap_or(0);
        inner.tree.insert(key, new_entry);
        inner.approximate_size = inner.approximate_size + added - removed;
    }

    pub fn delete(&self, key: Vec<u8>) {
        let mut inner = self.inner.write().expect("memtable lock poisoned");
        let new_entry = MemTableEntry::Tombstone;
        let added = Self::entry_cost(&key, &new_entry);
        let removed = inner
            .tree
            .get(&key)
            .map(|old| Self::entry_cost(&key, old))
            .unwrap_or(0);
        inner.tree.insert(key, new_entry);
        inner.approximate_size = inner.approximate_size + added - removed;
    }

    /// Returns the resident entry for `key`, or `None` if the key has
    /// never been written in this memtable generation. Callers must
    /// distinguish `Some(Tombstone)` (deleted, stop the lookup chain)
    /// from `None` (unseen here, fall through to SSTables).
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        let inner = self.inner.read().expect("memtable lock poisoned");
        inner.tree.get(key).cloned()
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.read().expect("memtable lock poisoned");
        inner.approximate_size >= self.write_buffer_size
    }

    /// Snapshots and clears the table in one step, for the flush path:
    /// the returned entries are handed to the SSTable writer while the
    /// table itself goes back to empty under the same lock, so no
    /// write landing between the snapshot and the clear can be lost.
    pub fn take_for_flush(&self) -> Vec<(Vec<u8>, MemTableEntry)> {
        let mut inner = self.inner.write().expect("memtable lock poisoned");
        let entries: Vec<_> = std::mem::take(&mut inner.tree).into_iter().collect();
        inner.approximate_size = 0;
        entries
    }

    pub fn approximate_size(&self) -> usize {
        self.inner
            .read()
            .expect("memtable lock poisoned")
            .approximate_size
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("memtable lock poisoned").tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in key order, ready for an SSTable writer.
    pub fn iter_sorted(&self) -> Vec<(Vec<u8>, MemTableEntry)> {
        let inner = self.inner.read().expect("memtable lock poisoned");
        inner
            .tree
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Range scan over resident keys, in ascending key order.
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<(Vec<u8>, MemTableEntry)> {
        let inner = self.inner.read().expect("memtable lock poisoned");
        inner
            .tree
            .iter()
            .filter(|(k, _)| start.map(|s| k.as_slice() >= s).unwrap_or(true))
            .filter(|(k, _)| end.map(|e| k.as_slice() < e).unwrap_or(true))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_value() {
        let mt = MemTable::new(1024);
        mt.put(b"a".to_vec(), b"1".to_vec());
        assert_eq!(mt.get(b"a").unwrap().as_value(), Some(&b"1"[..]));
    }

    #[test]
    fn delete_shadows_earlier_put() {
        let mt = MemTable::new(1024);
        mt.put(b"a".to_vec(), b"1".to_vec());
        mt.delete(b"a".to_vec());
        assert!(mt.get(b"a").unwrap().is_tombstone());
    }

    #[test]
    fn unseen_key_returns_none() {
        let mt = MemTable::new(1024);
        assert!(mt.get(b"missing").is_none());
    }

    #[test]
    fn is_full_once_threshold_crossed() {
        let mt = MemTable::new(64);
        assert!(!mt.is_full());
        mt.put(vec![0u8; 32], vec![0u8; 32]);
        assert!(mt.is_full());
    }

    #[test]
    fn iter_sorted_is_in_key_order() {
        let mt = MemTable::new(1024);
        mt.put(b"b".to_vec(), b"2".to_vec());
        mt.put(b"a".to_vec(), b"1".to_vec());
        let entries = mt.iter_sorted();
        assert_eq!(entries[0].0, b"a");
        assert_eq!(entries[1].0, b"b");
    }

    #[test]
    fn overwrite_updates_size_without_double_counting() {
        let mt = MemTable::new(1024);
        mt.put(b"a".to_vec(), vec![0u8; 10]);
        let after_first = mt.approximate_size();
        mt.put(b"a".to_vec(), vec![0u8; 10]);
        assert_eq!(mt.approximate_size(), after_first);
    }
}
