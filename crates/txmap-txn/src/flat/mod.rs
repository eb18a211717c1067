//! Flat-combined transactional map.
//!
//! The whole map is the resource of a flat combiner. A transaction only
//! buffers its operations; `commit()` submits the buffer as a single
//! combiner action, so every batch is applied without interleaving with any
//! other. There are no per-key guards and nothing to release on abort.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use txmap_combine::{Combiner, FlatCombiner, FlatParticipant, LinkedCombiner, Participant};
use txmap_common::config::{CombinerConfig, CombinerKind};
use txmap_common::constants::FIRST_TXN_ID;
use txmap_common::error::ConfigResult;
use txmap_common::types::TxnId;

use crate::cell::ResultCell;
use crate::engine::TransactionState;
use crate::error::{TransactionError, TxnResult};
use crate::op::Operation;

type Store<K, V> = HashMap<K, V>;

/// A map whose transactions are applied by a flat combiner.
///
/// The handle is cheap to clone; clones share the same map.
///
/// Calls that do not go through a [`Session`] borrow a parked participant
/// and return it afterwards, so the combiner sees at most as many
/// registrations as there were concurrent callers.
pub struct FlatCombinedMap<K, V> {
    combiner: FlatCombiner<Store<K, V>>,
    idle: Arc<Mutex<Vec<FlatParticipant<Store<K, V>>>>>,
    next_txn_id: Arc<AtomicU64>,
}

impl<K, V> FlatCombinedMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty map backed by a linked combiner.
    pub fn new() -> Self {
        Self::from_combiner(FlatCombiner::Linked(LinkedCombiner::new(HashMap::new())))
    }

    /// Creates an empty map backed by the combiner `config` describes.
    pub fn with_config(config: &CombinerConfig) -> ConfigResult<Self> {
        Ok(Self::from_combiner(FlatCombiner::new(HashMap::new(), config)?))
    }

    fn from_combiner(combiner: FlatCombiner<Store<K, V>>) -> Self {
        Self {
            combiner,
            idle: Arc::new(Mutex::new(Vec::new())),
            next_txn_id: Arc::new(AtomicU64::new(FIRST_TXN_ID)),
        }
    }

    fn next_id(&self) -> TxnId {
        TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Runs `action` through a parked participant, registering a new one
    /// only when none is idle.
    fn combine<T, F>(&self, action: F) -> T
    where
        F: FnOnce(&mut Store<K, V>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let parked = self.idle.lock().pop();
        let mut participant = parked.unwrap_or_else(|| self.combiner.register());
        let result = participant.combine(action);
        self.idle.lock().push(participant);
        result
    }

    /// Begins a transaction that borrows a parked participant to commit.
    ///
    /// Threads committing many transactions should prefer a [`Session`].
    pub fn begin_tx(&self) -> FlatTransaction<'static, K, V> {
        FlatTransaction::new(self.next_id(), Submitter::Pooled(self.clone()))
    }

    /// Opens a session that keeps one combiner registration for all of its
    /// transactions.
    pub fn session(&self) -> Session<K, V> {
        Session {
            map: self.clone(),
            participant: self.combiner.register(),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.combine(|store: &mut Store<K, V>| store.len())
    }

    /// Returns true if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the combining algorithm in use.
    pub fn kind(&self) -> CombinerKind {
        self.combiner.kind()
    }

    /// Returns the combiner's activity counters.
    pub fn combiner_stats(&self) -> &txmap_combine::CombinerStats {
        self.combiner.stats()
    }
}

impl<K, V> Default for FlatCombinedMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for FlatCombinedMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(entries: I) -> Self {
        let store: Store<K, V> = entries.into_iter().collect();
        Self::from_combiner(FlatCombiner::Linked(LinkedCombiner::new(store)))
    }
}

impl<K, V> Clone for FlatCombinedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            combiner: self.combiner.clone(),
            idle: Arc::clone(&self.idle),
            next_txn_id: Arc::clone(&self.next_txn_id),
        }
    }
}

impl<K, V> fmt::Debug for FlatCombinedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatCombinedMap")
            .field("combiner", &self.combiner)
            .field("idle", &self.idle.lock().len())
            .finish()
    }
}

/// A per-thread handle holding a combiner registration.
pub struct Session<K, V> {
    map: FlatCombinedMap<K, V>,
    participant: FlatParticipant<Store<K, V>>,
}

impl<K, V> Session<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Begins a transaction that commits through this session.
    pub fn begin_tx(&mut self) -> FlatTransaction<'_, K, V> {
        let id = self.map.next_id();
        FlatTransaction::new(id, Submitter::Session(&mut self.participant))
    }

    /// Returns the map this session belongs to.
    pub fn map(&self) -> &FlatCombinedMap<K, V> {
        &self.map
    }
}

impl<K, V> fmt::Debug for Session<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("map", &self.map).finish()
    }
}

enum Submitter<'s, K, V> {
    Pooled(FlatCombinedMap<K, V>),
    Session(&'s mut FlatParticipant<Store<K, V>>),
}

/// A transaction against a [`FlatCombinedMap`].
pub struct FlatTransaction<'s, K, V> {
    id: TxnId,
    submitter: Submitter<'s, K, V>,
    ops: Vec<Operation<K, V>>,
    state: TransactionState,
}

impl<'s, K, V> FlatTransaction<'s, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(id: TxnId, submitter: Submitter<'s, K, V>) -> Self {
        debug!(txn = %id, "flat transaction started");
        Self {
            id,
            submitter,
            ops: Vec::new(),
            state: TransactionState::Scheduled,
        }
    }

    fn buffer<T>(&mut self, (op, cell): (Operation<K, V>, ResultCell<T>)) -> TxnResult<ResultCell<T>> {
        self.ensure_scheduled()?;
        self.ops.push(op);
        Ok(cell)
    }

    /// Buffers a put. The cell receives the previous value.
    pub fn put(&mut self, key: K, value: V) -> TxnResult<ResultCell<Option<V>>> {
        self.buffer(Operation::put(key, value))
    }

    /// Buffers a remove. The cell receives the removed value.
    pub fn remove(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>> {
        self.buffer(Operation::remove(key))
    }

    /// Buffers a point read.
    pub fn get(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>> {
        self.buffer(Operation::get(key))
    }

    /// Buffers a membership test.
    pub fn contains_key(&mut self, key: K) -> TxnResult<ResultCell<bool>> {
        self.buffer(Operation::contains_key(key))
    }

    /// Buffers an entry count.
    pub fn size(&mut self) -> TxnResult<ResultCell<usize>> {
        self.buffer(Operation::size())
    }

    /// Applies the buffered operations as one combiner action.
    pub fn commit(&mut self) -> TxnResult<()> {
        self.ensure_scheduled()?;

        let ops = mem::take(&mut self.ops);
        let operations = ops.len();
        let batch = move |store: &mut Store<K, V>| {
            for op in ops {
                op.execute(store);
            }
        };
        match &mut self.submitter {
            Submitter::Pooled(map) => map.combine(batch),
            Submitter::Session(participant) => participant.combine(batch),
        }

        self.state = TransactionState::Committed;
        debug!(txn = %self.id, operations, "flat transaction committed");
        Ok(())
    }
}

impl<K, V> FlatTransaction<'_, K, V> {
    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true once the transaction has committed.
    pub fn is_committed(&self) -> bool {
        self.state == TransactionState::Committed
    }

    /// Returns the number of buffered operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discards the buffered operations.
    ///
    /// Aborting an aborted transaction is a no-op; aborting a committed one
    /// is an error.
    pub fn abort(&mut self) -> TxnResult<()> {
        match self.state {
            TransactionState::Committed => Err(TransactionError::InvalidState {
                txn_id: self.id,
                current: self.state,
                expected: "Scheduled",
            }),
            TransactionState::Aborted => Ok(()),
            TransactionState::Scheduled | TransactionState::Validated => {
                self.ops.clear();
                self.state = TransactionState::Aborted;
                debug!(txn = %self.id, "flat transaction aborted");
                Ok(())
            }
        }
    }

    fn ensure_scheduled(&self) -> TxnResult<()> {
        if self.state.is_scheduled() {
            Ok(())
        } else {
            Err(TransactionError::InvalidState {
                txn_id: self.id,
                current: self.state,
                expected: "Scheduled",
            })
        }
    }
}

impl<K, V> Drop for FlatTransaction<'_, K, V> {
    fn drop(&mut self) {
        if self.state.is_scheduled() {
            self.state = TransactionState::Aborted;
            debug!(txn = %self.id, "uncommitted flat transaction dropped");
        }
    }
}

impl<K, V> fmt::Debug for FlatTransaction<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatTransaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("operations", &self.ops.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const KINDS: [CombinerKind; 3] = [
        CombinerKind::Linked,
        CombinerKind::Array,
        CombinerKind::Handoff,
    ];

    #[test]
    fn test_put_twice_same_key() {
        let map: FlatCombinedMap<&str, i32> = FlatCombinedMap::new();
        let mut tx = map.begin_tx();
        let first = tx.put("a", 1).unwrap();
        let second = tx.put("a", 2).unwrap();
        assert_eq!(tx.len(), 2);
        tx.commit().unwrap();

        assert_eq!(first.get(), Some(None));
        assert_eq!(second.get(), Some(Some(1)));
        assert!(tx.is_committed());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_then_contains() {
        let map: FlatCombinedMap<&str, i32> = [("bar", 99)].into_iter().collect();
        let mut tx = map.begin_tx();
        let removed = tx.remove("bar").unwrap();
        let contains = tx.contains_key("bar").unwrap();
        tx.commit().unwrap();

        assert_eq!(removed.get(), Some(Some(99)));
        assert_eq!(contains.get(), Some(false));
        assert!(map.is_empty());
    }

    #[test]
    fn test_size_in_session() {
        for kind in KINDS {
            let map: FlatCombinedMap<&str, i32> =
                FlatCombinedMap::with_config(&CombinerConfig::new(kind)).unwrap();
            assert_eq!(map.kind(), kind);
            let mut session = map.session();

            let mut tx = session.begin_tx();
            tx.put("a", 1).unwrap();
            tx.put("b", 2).unwrap();
            tx.put("c", 3).unwrap();
            let size = tx.size().unwrap();
            tx.commit().unwrap();
            assert_eq!(size.get(), Some(3));
            drop(tx);

            let mut tx = session.begin_tx();
            tx.remove("a").unwrap();
            let size = tx.size().unwrap();
            tx.commit().unwrap();
            assert_eq!(size.get(), Some(2));
        }
    }

    #[test]
    fn test_abort_discards_batch() {
        let map: FlatCombinedMap<&str, i32> = FlatCombinedMap::new();
        let mut tx = map.begin_tx();
        let cell = tx.put("a", 1).unwrap();
        tx.abort().unwrap();

        assert!(tx.is_empty());
        assert!(!cell.is_completed());
        assert!(map.is_empty());
    }

    #[test]
    fn test_misuse_is_reported() {
        let map: FlatCombinedMap<&str, i32> = FlatCombinedMap::new();

        let mut tx = map.begin_tx();
        tx.abort().unwrap();
        assert!(matches!(
            tx.commit(),
            Err(TransactionError::InvalidState {
                current: TransactionState::Aborted,
                ..
            })
        ));

        let mut tx = map.begin_tx();
        tx.commit().unwrap();
        assert!(tx.abort().is_err());
        assert!(tx.commit().is_err());
        assert!(tx.get("a").is_err());
    }

    #[test]
    fn test_dropped_transaction_applies_nothing() {
        let map: FlatCombinedMap<&str, i32> = FlatCombinedMap::new();
        let cell = {
            let mut tx = map.begin_tx();
            tx.put("a", 1).unwrap()
        };
        assert!(!cell.is_completed());
        assert!(map.is_empty());
    }

    #[test]
    fn test_one_shot_calls_reuse_a_participant() {
        for kind in KINDS {
            let map: FlatCombinedMap<u32, u32> =
                FlatCombinedMap::with_config(&CombinerConfig::new(kind)).unwrap();
            for i in 0..100 {
                let mut tx = map.begin_tx();
                tx.put(i % 10, i).unwrap();
                tx.commit().unwrap();
                assert!(map.len() <= 10);
            }
            let stats = map.combiner_stats();
            assert_eq!(stats.participants.load(Ordering::Relaxed), 1, "{kind:?}");
            assert_eq!(stats.applied_count(), 200);

            // A session keeps its own registration.
            let mut session = map.session();
            session.begin_tx().commit().unwrap();
            assert_eq!(stats.participants.load(Ordering::Relaxed), 2);
        }
    }

    #[test]
    fn test_batches_never_interleave() {
        for kind in KINDS {
            let config = CombinerConfig::new(kind).with_capacity(4).with_threshold(4);
            let map: FlatCombinedMap<&str, u64> = FlatCombinedMap::with_config(&config).unwrap();

            let writers: Vec<_> = (0..4)
                .map(|_| {
                    let mut session = map.session();
                    thread::spawn(move || {
                        for i in 0..500u64 {
                            let mut tx = session.begin_tx();
                            tx.put("left", i).unwrap();
                            tx.put("right", i).unwrap();
                            tx.commit().unwrap();
                        }
                    })
                })
                .collect();
            let readers: Vec<_> = (0..2)
                .map(|_| {
                    let mut session = map.session();
                    thread::spawn(move || {
                        for _ in 0..500 {
                            let mut tx = session.begin_tx();
                            let left = tx.get("left").unwrap();
                            let right = tx.get("right").unwrap();
                            tx.commit().unwrap();
                            assert_eq!(left.get(), right.get());
                        }
                    })
                })
                .collect();

            for handle in writers.into_iter().chain(readers) {
                handle.join().unwrap();
            }
            assert_eq!(map.len(), 2);
        }
    }
}
