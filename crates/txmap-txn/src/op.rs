//! Operations registered by a transaction.
//!
//! Every operation carries the result cell it completes. Guards are bucketed
//! by the operation's variant only, so a `put` and a `remove` on the same key
//! share the `Modify` guard while `get` and `contains_key` each have their
//! own.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use dashmap::DashMap;

use crate::cell::ResultCell;

/// Guard bucket an operation locks.
///
/// The derived order is the acquisition order for guards on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// `put` and `remove`.
    Modify,
    /// `get`.
    Get,
    /// `contains_key`.
    Contains,
    /// `size`; a single map-wide guard rather than one per key.
    Size,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Modify => write!(f, "modify"),
            Bucket::Get => write!(f, "get"),
            Bucket::Contains => write!(f, "contains"),
            Bucket::Size => write!(f, "size"),
        }
    }
}

/// Which mutation a `Modify` operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifyKind {
    /// Insert or overwrite.
    Put,
    /// Delete.
    Remove,
}

/// A registered operation together with the cell its outcome goes to.
pub enum Operation<K, V> {
    /// A deferred mutation. `element` is the value to store for a put.
    Modify {
        /// Put or remove.
        kind: ModifyKind,
        /// Target key.
        key: K,
        /// Value written by a put; `None` for a remove.
        element: Option<V>,
        /// Receives the previous value.
        cell: ResultCell<Option<V>>,
    },
    /// A point read.
    Get {
        /// Target key.
        key: K,
        /// Receives the value, if present.
        cell: ResultCell<Option<V>>,
    },
    /// A membership test.
    ContainsKey {
        /// Target key.
        key: K,
        /// Receives whether the key is present.
        cell: ResultCell<bool>,
    },
    /// The number of entries.
    Size {
        /// Receives the entry count.
        cell: ResultCell<usize>,
    },
}

impl<K, V> Operation<K, V> {
    pub(crate) fn put(key: K, value: V) -> (Self, ResultCell<Option<V>>) {
        let cell = ResultCell::new();
        let op = Operation::Modify {
            kind: ModifyKind::Put,
            key,
            element: Some(value),
            cell: cell.clone(),
        };
        (op, cell)
    }

    pub(crate) fn remove(key: K) -> (Self, ResultCell<Option<V>>) {
        let cell = ResultCell::new();
        let op = Operation::Modify {
            kind: ModifyKind::Remove,
            key,
            element: None,
            cell: cell.clone(),
        };
        (op, cell)
    }

    pub(crate) fn get(key: K) -> (Self, ResultCell<Option<V>>) {
        let cell = ResultCell::new();
        (Operation::Get { key, cell: cell.clone() }, cell)
    }

    pub(crate) fn contains_key(key: K) -> (Self, ResultCell<bool>) {
        let cell = ResultCell::new();
        (Operation::ContainsKey { key, cell: cell.clone() }, cell)
    }

    pub(crate) fn size() -> (Self, ResultCell<usize>) {
        let cell = ResultCell::new();
        (Operation::Size { cell: cell.clone() }, cell)
    }

    /// Returns the guard bucket of this operation.
    pub fn bucket(&self) -> Bucket {
        match self {
            Operation::Modify { .. } => Bucket::Modify,
            Operation::Get { .. } => Bucket::Get,
            Operation::ContainsKey { .. } => Bucket::Contains,
            Operation::Size { .. } => Bucket::Size,
        }
    }

    /// Returns the key this operation targets, if any.
    pub fn key(&self) -> Option<&K> {
        match self {
            Operation::Modify { key, .. }
            | Operation::Get { key, .. }
            | Operation::ContainsKey { key, .. } => Some(key),
            Operation::Size { .. } => None,
        }
    }

    /// Returns the mutation kind for `Modify` operations.
    pub fn modify_kind(&self) -> Option<ModifyKind> {
        match self {
            Operation::Modify { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true for operations that only read.
    pub fn is_read(&self) -> bool {
        !matches!(self, Operation::Modify { .. })
    }

    /// Runs the operation against `store` and completes its cell.
    pub(crate) fn execute<S: MapStore<K, V>>(self, store: &mut S) {
        match self {
            Operation::Modify {
                key, element, cell, ..
            } => {
                let previous = match element {
                    Some(value) => store.insert(key, value),
                    None => store.remove(&key),
                };
                cell.complete(previous);
            }
            Operation::Get { key, cell } => cell.complete(store.get(&key)),
            Operation::ContainsKey { key, cell } => cell.complete(store.contains_key(&key)),
            Operation::Size { cell } => cell.complete(store.len()),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Operation<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Modify { kind, key, .. } => f
                .debug_struct("Modify")
                .field("kind", kind)
                .field("key", key)
                .finish(),
            Operation::Get { key, .. } => f.debug_struct("Get").field("key", key).finish(),
            Operation::ContainsKey { key, .. } => {
                f.debug_struct("ContainsKey").field("key", key).finish()
            }
            Operation::Size { .. } => f.write_str("Size"),
        }
    }
}

/// The map an operation executes against.
pub(crate) trait MapStore<K, V> {
    fn insert(&mut self, key: K, value: V) -> Option<V>;
    fn remove(&mut self, key: &K) -> Option<V>;
    fn get(&self, key: &K) -> Option<V>;
    fn contains_key(&self, key: &K) -> bool;
    fn len(&self) -> usize;
}

impl<K: Eq + Hash, V: Clone> MapStore<K, V> for HashMap<K, V> {
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        HashMap::insert(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        HashMap::remove(self, key)
    }

    fn get(&self, key: &K) -> Option<V> {
        HashMap::get(self, key).cloned()
    }

    fn contains_key(&self, key: &K) -> bool {
        HashMap::contains_key(self, key)
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

impl<K: Eq + Hash, V: Clone> MapStore<K, V> for &DashMap<K, V> {
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        DashMap::insert(*self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        DashMap::remove(*self, key).map(|(_, value)| value)
    }

    fn get(&self, key: &K) -> Option<V> {
        DashMap::get(*self, key).map(|entry| entry.value().clone())
    }

    fn contains_key(&self, key: &K) -> bool {
        DashMap::contains_key(*self, key)
    }

    fn len(&self) -> usize {
        DashMap::len(*self)
    }
}
