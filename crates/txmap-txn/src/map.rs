//! The surface both map variants share.
//!
//! Code that only needs "begin, queue operations, commit" can be written
//! once against [`TransactionalMap`] and run on either isolation strategy.

use std::fmt;
use std::hash::Hash;

use crate::cell::ResultCell;
use crate::engine::{PessimisticMap, Transaction, TransactionState};
use crate::error::TxnResult;
use crate::flat::{FlatCombinedMap, FlatTransaction};
use txmap_common::types::TxnId;

/// How a map keeps concurrent transactions apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isolation {
    /// Per-key reader/writer guards taken at commit.
    Pessimistic,
    /// Whole batches applied one at a time by a flat combiner.
    FlatCombined,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolation::Pessimistic => write!(f, "pessimistic"),
            Isolation::FlatCombined => write!(f, "flat-combined"),
        }
    }
}

/// A transaction that queues operations and applies them at commit.
pub trait MapTransaction<K, V> {
    /// Queues a put; the cell receives the previous value.
    fn put(&mut self, key: K, value: V) -> TxnResult<ResultCell<Option<V>>>;

    /// Queues a remove; the cell receives the removed value.
    fn remove(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>>;

    /// Queues a point read.
    fn get(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>>;

    /// Queues a membership test.
    fn contains_key(&mut self, key: K) -> TxnResult<ResultCell<bool>>;

    /// Queues an entry count.
    fn size(&mut self) -> TxnResult<ResultCell<usize>>;

    /// Applies every queued operation atomically.
    fn commit(&mut self) -> TxnResult<()>;

    /// Discards the transaction.
    fn abort(&mut self) -> TxnResult<()>;

    /// Returns the transaction ID.
    fn id(&self) -> TxnId;

    /// Returns the current state.
    fn state(&self) -> TransactionState;

    /// Returns true once the transaction has committed.
    fn is_committed(&self) -> bool {
        self.state() == TransactionState::Committed
    }
}

mod sealed {
    pub trait Sealed {}

    impl<K, V> Sealed for crate::engine::PessimisticMap<K, V> {}
    impl<K, V> Sealed for crate::flat::FlatCombinedMap<K, V> {}
}

/// A map that hands out transactions.
///
/// Implemented by [`PessimisticMap`] and [`FlatCombinedMap`] only.
pub trait TransactionalMap<K, V>: sealed::Sealed + Clone + Send + Sync {
    /// The transaction type.
    type Transaction: MapTransaction<K, V>;

    /// Begins a transaction.
    fn begin_tx(&self) -> Self::Transaction;

    /// Returns the isolation strategy.
    fn isolation(&self) -> Isolation;

    /// Returns the number of entries.
    fn len(&self) -> usize;

    /// Returns true if the map has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

macro_rules! delegate_transaction {
    () => {
        fn put(&mut self, key: K, value: V) -> TxnResult<ResultCell<Option<V>>> {
            Self::put(self, key, value)
        }

        fn remove(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>> {
            Self::remove(self, key)
        }

        fn get(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>> {
            Self::get(self, key)
        }

        fn contains_key(&mut self, key: K) -> TxnResult<ResultCell<bool>> {
            Self::contains_key(self, key)
        }

        fn size(&mut self) -> TxnResult<ResultCell<usize>> {
            Self::size(self)
        }

        fn commit(&mut self) -> TxnResult<()> {
            Self::commit(self)
        }

        fn abort(&mut self) -> TxnResult<()> {
            Self::abort(self)
        }

        fn id(&self) -> TxnId {
            Self::id(self)
        }

        fn state(&self) -> TransactionState {
            Self::state(self)
        }
    };
}

impl<K, V> MapTransaction<K, V> for Transaction<K, V>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    delegate_transaction!();
}

impl<K, V> MapTransaction<K, V> for FlatTransaction<'_, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    delegate_transaction!();
}

impl<K, V> TransactionalMap<K, V> for PessimisticMap<K, V>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Transaction = Transaction<K, V>;

    fn begin_tx(&self) -> Self::Transaction {
        PessimisticMap::begin_tx(self)
    }

    fn isolation(&self) -> Isolation {
        Isolation::Pessimistic
    }

    fn len(&self) -> usize {
        PessimisticMap::len(self)
    }
}

impl<K, V> TransactionalMap<K, V> for FlatCombinedMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Transaction = FlatTransaction<'static, K, V>;

    fn begin_tx(&self) -> Self::Transaction {
        FlatCombinedMap::begin_tx(self)
    }

    fn isolation(&self) -> Isolation {
        Isolation::FlatCombined
    }

    fn len(&self) -> usize {
        FlatCombinedMap::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer<M: TransactionalMap<&'static str, i64>>(map: &M, amount: i64) {
        let mut tx = map.begin_tx();
        let from = tx.get("alice").unwrap();
        tx.put("alice", 100 - amount).unwrap();
        tx.put("bob", amount).unwrap();
        tx.commit().unwrap();
        assert_eq!(from.get(), Some(Some(100)));
        assert!(tx.is_committed());
    }

    fn seeded<M: TransactionalMap<&'static str, i64>>(map: M) -> M {
        let mut tx = map.begin_tx();
        tx.put("alice", 100).unwrap();
        tx.commit().unwrap();
        map
    }

    #[test]
    fn test_same_code_runs_on_both_variants() {
        let pessimistic = seeded(PessimisticMap::new());
        transfer(&pessimistic, 30);
        assert_eq!(pessimistic.isolation(), Isolation::Pessimistic);
        assert_eq!(TransactionalMap::len(&pessimistic), 2);

        let flat = seeded(FlatCombinedMap::new());
        transfer(&flat, 30);
        assert_eq!(flat.isolation(), Isolation::FlatCombined);
        assert_eq!(TransactionalMap::len(&flat), 2);
    }

    #[test]
    fn test_abort_through_trait() {
        fn aborted<M: TransactionalMap<u32, u32>>(map: &M) {
            let mut tx = map.begin_tx();
            tx.put(1, 1).unwrap();
            tx.abort().unwrap();
            assert_eq!(tx.state(), TransactionState::Aborted);
            assert!(tx.commit().is_err());
            assert!(map.is_empty());
        }
        aborted(&PessimisticMap::new());
        aborted(&FlatCombinedMap::new());
    }

    #[test]
    fn test_isolation_display() {
        assert_eq!(Isolation::Pessimistic.to_string(), "pessimistic");
        assert_eq!(Isolation::FlatCombined.to_string(), "flat-combined");
    }
}
