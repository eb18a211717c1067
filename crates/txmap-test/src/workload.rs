//! Seeded random transactions over a small `u32 -> u64` key space.
//!
//! A small key space keeps contention high, which is what the stress tests
//! want. Every plan can also be replayed against a plain `HashMap` to get
//! the results a serial execution would produce.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use txmap_txn::{MapTransaction, ResultCell, TxnResult};

/// Shape of the generated transactions.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Keys are drawn from `0..key_space`.
    pub key_space: u32,
    /// Number of operations per transaction.
    pub ops_per_tx: RangeInclusive<usize>,
    /// Share of point reads (`get` and `contains_key`).
    pub read_ratio: f64,
    /// Share of `size` operations.
    pub size_ratio: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            key_space: 16,
            ops_per_tx: 1..=6,
            read_ratio: 0.5,
            size_ratio: 0.05,
        }
    }
}

impl WorkloadConfig {
    /// Sets the key space.
    #[must_use]
    pub fn with_key_space(mut self, key_space: u32) -> Self {
        self.key_space = key_space;
        self
    }

    /// Sets the operation count range.
    #[must_use]
    pub fn with_ops_per_tx(mut self, ops: RangeInclusive<usize>) -> Self {
        self.ops_per_tx = ops;
        self
    }

    /// Sets the read share.
    #[must_use]
    pub fn with_read_ratio(mut self, ratio: f64) -> Self {
        self.read_ratio = ratio;
        self
    }

    /// Sets the size share.
    #[must_use]
    pub fn with_size_ratio(mut self, ratio: f64) -> Self {
        self.size_ratio = ratio;
        self
    }
}

/// One generated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOp {
    /// `put(key, value)`
    Put(u32, u64),
    /// `remove(key)`
    Remove(u32),
    /// `get(key)`
    Get(u32),
    /// `contains_key(key)`
    ContainsKey(u32),
    /// `size()`
    Size,
}

/// What an operation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Result of put, remove and get.
    Value(Option<u64>),
    /// Result of contains_key.
    Flag(bool),
    /// Result of size.
    Count(usize),
}

impl PlannedOp {
    /// Applies the operation to a serial model.
    pub fn apply(&self, model: &mut HashMap<u32, u64>) -> Outcome {
        match *self {
            PlannedOp::Put(key, value) => Outcome::Value(model.insert(key, value)),
            PlannedOp::Remove(key) => Outcome::Value(model.remove(&key)),
            PlannedOp::Get(key) => Outcome::Value(model.get(&key).copied()),
            PlannedOp::ContainsKey(key) => Outcome::Flag(model.contains_key(&key)),
            PlannedOp::Size => Outcome::Count(model.len()),
        }
    }

    /// Returns true for operations that change the map.
    pub fn is_write(&self) -> bool {
        matches!(self, PlannedOp::Put(..) | PlannedOp::Remove(_))
    }
}

/// The cell an enqueued [`PlannedOp`] handed back.
#[derive(Debug, Clone)]
pub enum PlannedCell {
    /// Cell of put, remove or get.
    Value(ResultCell<Option<u64>>),
    /// Cell of contains_key.
    Flag(ResultCell<bool>),
    /// Cell of size.
    Count(ResultCell<usize>),
}

impl PlannedCell {
    /// Returns the produced outcome, if the transaction committed.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            PlannedCell::Value(cell) => cell.get().map(Outcome::Value),
            PlannedCell::Flag(cell) => cell.get().map(Outcome::Flag),
            PlannedCell::Count(cell) => cell.get().map(Outcome::Count),
        }
    }
}

/// Enqueues `plan` on `tx` and returns the cells in plan order.
pub fn enqueue<T>(tx: &mut T, plan: &[PlannedOp]) -> TxnResult<Vec<PlannedCell>>
where
    T: MapTransaction<u32, u64>,
{
    plan.iter()
        .map(|op| {
            Ok(match *op {
                PlannedOp::Put(key, value) => PlannedCell::Value(tx.put(key, value)?),
                PlannedOp::Remove(key) => PlannedCell::Value(tx.remove(key)?),
                PlannedOp::Get(key) => PlannedCell::Value(tx.get(key)?),
                PlannedOp::ContainsKey(key) => PlannedCell::Flag(tx.contains_key(key)?),
                PlannedOp::Size => PlannedCell::Count(tx.size()?),
            })
        })
        .collect()
}

/// Deterministic transaction generator.
#[derive(Debug)]
pub struct Workload {
    config: WorkloadConfig,
    rng: StdRng,
    next_value: u64,
}

impl Workload {
    /// Creates a generator. The same seed yields the same plans.
    pub fn new(seed: u64, config: WorkloadConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            next_value: seed << 32,
        }
    }

    /// Generates the next transaction.
    pub fn next_plan(&mut self) -> Vec<PlannedOp> {
        let count = self.rng.gen_range(self.config.ops_per_tx.clone());
        (0..count).map(|_| self.next_op()).collect()
    }

    fn next_op(&mut self) -> PlannedOp {
        let key = self.rng.gen_range(0..self.config.key_space);
        let roll: f64 = self.rng.gen();
        if roll < self.config.size_ratio {
            PlannedOp::Size
        } else if roll < self.config.size_ratio + self.config.read_ratio {
            if self.rng.gen_bool(0.5) {
                PlannedOp::Get(key)
            } else {
                PlannedOp::ContainsKey(key)
            }
        } else if self.rng.gen_bool(0.7) {
            self.next_value += 1;
            PlannedOp::Put(key, self.next_value)
        } else {
            PlannedOp::Remove(key)
        }
    }
}
