//! Pessimistic transactional map.
//!
//! Transactions are two-phase locked against the guards of the
//! [`KeyRegistry`]. Operations are only registered until `commit()`, which
//! runs in two phases:
//!
//! 1. **Validate**: take every guard the transaction needs, in one global
//!    order: key guards sorted by `(key, bucket)`, then the map-wide size
//!    guard. Writes take the `Modify` write lock plus the `Get` and
//!    `Contains` guards as a writer. Reads take a reader slot, waiting on any
//!    writer latch held by another transaction. Membership changes (a put on
//!    an absent key, a remove on a present one) also take the size guard as
//!    a writer.
//! 2. **Commit**: execute every operation in registration order against the
//!    map, complete the result cells, release the guards.
//!
//! ```text
//! ┌───────────┐  commit()  ┌───────────┐         ┌───────────┐
//! │ Scheduled │───────────▶│ Validated │────────▶│ Committed │
//! └───────────┘            └───────────┘         └───────────┘
//!       │                        │
//!       │ abort() / drop /       │
//!       │ read wait timed out    │
//!       ▼                        │
//! ┌───────────┐                  │
//! │  Aborted  │◀─────────────────┘
//! └───────────┘
//! ```

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use txmap_common::config::{EngineConfig, RegistryPolicy};
use txmap_common::constants::FIRST_TXN_ID;
use txmap_common::error::ConfigResult;
use txmap_common::types::TxnId;

use crate::cell::ResultCell;
use crate::error::{AbortReason, TransactionError, TxnResult};
use crate::guard::SharedAcquire;
use crate::op::{Bucket, ModifyKind, Operation};
use crate::registry::{GuardHandle, KeyRegistry};

/// The state of a transaction or of one of its operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Registered, nothing acquired yet.
    Scheduled,
    /// Every guard needed is held.
    Validated,
    /// Applied to the map.
    Committed,
    /// Rolled back; nothing was applied.
    Aborted,
}

impl TransactionState {
    /// Returns true if the transaction can still register operations.
    pub fn is_scheduled(&self) -> bool {
        *self == TransactionState::Scheduled
    }

    /// Returns true if the transaction has ended.
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Scheduled => write!(f, "Scheduled"),
            TransactionState::Validated => write!(f, "Validated"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Statistics about the engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Transactions started.
    pub started: AtomicU64,
    /// Transactions committed.
    pub committed: AtomicU64,
    /// Transactions aborted, explicitly, by drop, or by a failed read.
    pub aborted: AtomicU64,
    /// Reads that had to wait on a writer latch.
    pub read_waits: AtomicU64,
    /// Reads whose wait timed out.
    pub read_timeouts: AtomicU64,
}

impl EngineStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_started(&self) {
        self.started.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_committed(&self) {
        self.committed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_aborted(&self) {
        self.aborted.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_read_wait(&self) {
        self.read_waits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_read_timeout(&self) {
        self.read_timeouts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Returns the number of committed transactions.
    pub fn committed_count(&self) -> u64 {
        self.committed.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of aborted transactions.
    pub fn aborted_count(&self) -> u64 {
        self.aborted.load(AtomicOrdering::Relaxed)
    }
}

struct Shared<K, V> {
    map: DashMap<K, V>,
    registry: KeyRegistry<K>,
    config: EngineConfig,
    stats: EngineStats,
    next_txn_id: AtomicU64,
}

/// A concurrent map whose operations are grouped into two-phase-locked
/// transactions.
///
/// The handle is cheap to clone; clones share the same map.
pub struct PessimisticMap<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> PessimisticMap<K, V>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty map with the default configuration.
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Creates an empty map with a validated configuration.
    pub fn with_config(config: EngineConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                map: DashMap::new(),
                registry: KeyRegistry::new(config.registry_policy),
                config,
                stats: EngineStats::new(),
                next_txn_id: AtomicU64::new(FIRST_TXN_ID),
            }),
        }
    }

    /// Begins a new transaction.
    pub fn begin_tx(&self) -> Transaction<K, V> {
        let id = TxnId::new(self.shared.next_txn_id.fetch_add(1, AtomicOrdering::SeqCst));
        self.shared.stats.record_started();
        debug!(txn = %id, "transaction started");
        Transaction {
            id,
            shared: Arc::clone(&self.shared),
            state: TransactionState::Scheduled,
            children: Vec::new(),
            held: Vec::new(),
            abort_reason: None,
        }
    }

    /// Returns the number of committed entries.
    ///
    /// Not isolated from transactions that are committing concurrently; use
    /// [`Transaction::size`] for a consistent count.
    pub fn len(&self) -> usize {
        self.shared.map.len()
    }

    /// Returns true if no entries are committed.
    pub fn is_empty(&self) -> bool {
        self.shared.map.is_empty()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.shared.stats
    }

    /// Returns the guard registry.
    pub fn registry(&self) -> &KeyRegistry<K> {
        &self.shared.registry
    }
}

impl<K, V> Default for PessimisticMap<K, V>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for PessimisticMap<K, V>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(entries: I) -> Self {
        let map = Self::new();
        for (key, value) in entries {
            map.shared.map.insert(key, value);
        }
        map
    }
}

impl<K, V> Clone for PessimisticMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> fmt::Debug for PessimisticMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PessimisticMap")
            .field("config", &self.shared.config)
            .field("registry", &self.shared.registry)
            .finish()
    }
}

/// One registered operation of a transaction.
pub struct ChildTransaction<K, V> {
    op: Operation<K, V>,
    /// Resolved at registration for reads; writes resolve at commit.
    guard: Option<GuardHandle<K>>,
    state: TransactionState,
}

impl<K, V> ChildTransaction<K, V> {
    /// Returns the operation.
    pub fn operation(&self) -> &Operation<K, V> {
        &self.op
    }

    /// Returns the operation's state.
    pub fn state(&self) -> TransactionState {
        self.state
    }
}

impl<K: fmt::Debug, V> fmt::Debug for ChildTransaction<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildTransaction")
            .field("op", &self.op)
            .field("state", &self.state)
            .finish()
    }
}

/// How a held guard was taken, and therefore how it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Write lock only; nobody reads the `Modify` bucket.
    Write,
    /// Write lock, latch held, readers drained.
    Exclusive,
    /// A reader slot.
    Shared,
}

struct Held<K> {
    handle: GuardHandle<K>,
    mode: Mode,
}

/// A planned guard acquisition during validation.
struct Acquisition<K> {
    handle: GuardHandle<K>,
    mode: Mode,
    /// Read children satisfied by this acquisition.
    readers: Vec<usize>,
}

/// A single-use transaction against a [`PessimisticMap`].
///
/// Dropping a transaction that has not committed aborts it.
pub struct Transaction<K: Eq + Hash, V> {
    id: TxnId,
    shared: Arc<Shared<K, V>>,
    state: TransactionState,
    children: Vec<ChildTransaction<K, V>>,
    held: Vec<Held<K>>,
    abort_reason: Option<AbortReason>,
}

impl<K, V> Transaction<K, V>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Registers a put. The cell receives the previous value.
    pub fn put(&mut self, key: K, value: V) -> TxnResult<ResultCell<Option<V>>> {
        self.ensure_scheduled()?;
        let (op, cell) = Operation::put(key, value);
        self.register(op);
        Ok(cell)
    }

    /// Registers a remove. The cell receives the removed value.
    pub fn remove(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>> {
        self.ensure_scheduled()?;
        let (op, cell) = Operation::remove(key);
        self.register(op);
        Ok(cell)
    }

    /// Registers a point read.
    pub fn get(&mut self, key: K) -> TxnResult<ResultCell<Option<V>>> {
        self.ensure_scheduled()?;
        let (op, cell) = Operation::get(key);
        self.register(op);
        Ok(cell)
    }

    /// Registers a membership test.
    pub fn contains_key(&mut self, key: K) -> TxnResult<ResultCell<bool>> {
        self.ensure_scheduled()?;
        let (op, cell) = Operation::contains_key(key);
        self.register(op);
        Ok(cell)
    }

    /// Registers an entry count.
    pub fn size(&mut self) -> TxnResult<ResultCell<usize>> {
        self.ensure_scheduled()?;
        let (op, cell) = Operation::size();
        self.register(op);
        Ok(cell)
    }

    fn register(&mut self, op: Operation<K, V>) {
        let registry = &self.shared.registry;
        let guard = match (op.is_read(), op.key()) {
            (false, _) => None,
            (true, Some(key)) => Some(registry.handle(key, op.bucket())),
            (true, None) => Some(registry.size_handle()),
        };
        self.children.push(ChildTransaction {
            op,
            guard,
            state: TransactionState::Scheduled,
        });
    }

    /// Validates, applies and releases the transaction.
    ///
    /// Returns [`TransactionError::Aborted`] if a read could not validate;
    /// the transaction is then rolled back and no cell is completed.
    pub fn commit(&mut self) -> TxnResult<()> {
        self.ensure_scheduled()?;

        self.validate();
        if let Some(reason) = self.abort_reason.take() {
            self.rollback();
            self.shared.stats.record_aborted();
            debug!(txn = %self.id, %reason, "transaction aborted at commit");
            return Err(TransactionError::Aborted {
                txn_id: self.id,
                reason,
            });
        }
        self.state = TransactionState::Validated;

        let operations = self.children.len();
        self.execute();
        self.release_all();
        self.state = TransactionState::Committed;

        self.shared.stats.record_committed();
        debug!(txn = %self.id, operations, "transaction committed");
        Ok(())
    }

    /// Acquires every guard the transaction needs, in global order.
    fn validate(&mut self) {
        let shared = Arc::clone(&self.shared);
        let registry = &shared.registry;

        let mut plan: BTreeMap<(K, Bucket), Acquisition<K>> = BTreeMap::new();
        for child in &self.children {
            let Operation::Modify { key, .. } = &child.op else {
                continue;
            };
            for (bucket, mode) in [
                (Bucket::Modify, Mode::Write),
                (Bucket::Get, Mode::Exclusive),
                (Bucket::Contains, Mode::Exclusive),
            ] {
                plan.entry((key.clone(), bucket))
                    .or_insert_with(|| Acquisition {
                        handle: registry.handle(key, bucket),
                        mode,
                        readers: Vec::new(),
                    });
            }
        }

        let mut size_readers = Vec::new();
        for (index, child) in self.children.iter().enumerate() {
            if !child.op.is_read() {
                continue;
            }
            let Some(key) = child.op.key() else {
                size_readers.push(index);
                continue;
            };
            let bucket = child.op.bucket();
            match plan.entry((key.clone(), bucket)) {
                // A guard held as a writer already covers our own reads.
                Entry::Occupied(mut entry) => entry.get_mut().readers.push(index),
                Entry::Vacant(entry) => {
                    entry.insert(Acquisition {
                        handle: child
                            .guard
                            .clone()
                            .unwrap_or_else(|| registry.handle(key, bucket)),
                        mode: Mode::Shared,
                        readers: vec![index],
                    });
                }
            }
        }

        for acquisition in plan.into_values() {
            if !self.acquire(acquisition) {
                return;
            }
        }
        for child in &mut self.children {
            if !child.op.is_read() {
                child.state = TransactionState::Validated;
            }
        }

        // Key guards are all held, so no other transaction can change the
        // membership of our keys while we decide.
        let changes_membership = self.children.iter().any(|child| match &child.op {
            Operation::Modify { kind, key, .. } => {
                let present = shared.map.contains_key(key);
                match kind {
                    ModifyKind::Put => !present,
                    ModifyKind::Remove => present,
                }
            }
            _ => false,
        });

        if changes_membership {
            self.acquire(Acquisition {
                handle: registry.size_handle(),
                mode: Mode::Exclusive,
                readers: size_readers,
            });
        } else if !size_readers.is_empty() {
            self.acquire(Acquisition {
                handle: registry.size_handle(),
                mode: Mode::Shared,
                readers: size_readers,
            });
        }
    }

    /// Takes one planned guard. Returns false if a read wait timed out.
    fn acquire(&mut self, acquisition: Acquisition<K>) -> bool {
        let Acquisition {
            handle,
            mode,
            readers,
        } = acquisition;
        let guard = handle.guard();
        let config = &self.shared.config;

        match mode {
            Mode::Write => guard.lock_write(self.id),
            Mode::Exclusive => guard.acquire_exclusive(self.id, config.drain_spin_limit),
            Mode::Shared => match guard.acquire_shared(self.id, config.latch_wait_timeout) {
                SharedAcquire::Acquired { waited } => {
                    if waited {
                        self.shared.stats.record_read_wait();
                    }
                }
                SharedAcquire::TimedOut => {
                    let bucket = handle.bucket();
                    for index in readers {
                        self.children[index].state = TransactionState::Aborted;
                    }
                    self.shared.stats.record_read_wait();
                    self.shared.stats.record_read_timeout();
                    warn!(txn = %self.id, %bucket, "read timed out waiting on a writer latch");
                    self.abort_reason = Some(AbortReason::ReadTimedOut {
                        bucket,
                        waited: config.latch_wait_timeout.unwrap_or_default(),
                    });
                    return false;
                }
            },
        }

        for index in readers {
            self.children[index].state = TransactionState::Validated;
        }
        self.held.push(Held { handle, mode });
        true
    }

    /// Runs every operation in registration order and completes its cell.
    fn execute(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut store = &shared.map;
        for child in self.children.drain(..) {
            child.op.execute(&mut store);
        }
    }
}

impl<K: Eq + Hash, V> Transaction<K, V> {
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

    /// Returns true if a read failed validation and the transaction must
    /// abort.
    pub fn has_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    /// Returns the registered operations. Empty once the transaction ended.
    pub fn children(&self) -> &[ChildTransaction<K, V>] {
        &self.children
    }

    /// Returns the number of guards currently held.
    pub fn held_guards(&self) -> usize {
        self.held.len()
    }

    /// Rolls the transaction back.
    ///
    /// Does nothing once the transaction has ended, committed or aborted, so
    /// it is safe to call on every exit path.
    pub fn abort(&mut self) -> TxnResult<()> {
        match self.state {
            TransactionState::Aborted | TransactionState::Committed => Ok(()),
            TransactionState::Scheduled | TransactionState::Validated => {
                self.rollback();
                self.shared.stats.record_aborted();
                debug!(txn = %self.id, "transaction aborted");
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

    fn rollback(&mut self) {
        for child in &mut self.children {
            child.state = TransactionState::Aborted;
        }
        self.children.clear();
        self.release_all();
        self.state = TransactionState::Aborted;
    }

    /// Releases every held guard and gives idle ones back to the registry.
    fn release_all(&mut self) {
        let evict = self.shared.registry.policy() == RegistryPolicy::EvictIdle;
        let mut touched = Vec::new();

        for Held { handle, mode } in self.held.drain(..).rev() {
            let guard = handle.guard();
            match mode {
                Mode::Write => guard.unlock_write(self.id),
                Mode::Exclusive => guard.release_exclusive(self.id),
                Mode::Shared => guard.release_shared(),
            }
            if let GuardHandle::Key { key, .. } = handle {
                if evict {
                    touched.push(key);
                }
            }
        }

        if !touched.is_empty() {
            self.shared.registry.evict_idle(&touched);
        }
    }
}

impl<K: Eq + Hash, V> Drop for Transaction<K, V> {
    fn drop(&mut self) {
        if !self.state.is_ended() {
            self.rollback();
            self.shared.stats.record_aborted();
            debug!(txn = %self.id, "uncommitted transaction dropped, aborted");
        }
    }
}

impl<K: Eq + Hash, V> fmt::Debug for Transaction<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("operations", &self.children.len())
            .field("held", &self.held.len())
            .finish()
    }
}
