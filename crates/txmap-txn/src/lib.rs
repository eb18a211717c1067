//! # txmap-txn
//!
//! Transactional in-memory map.
//!
//! A transaction queues `put`, `remove`, `get`, `containsKey` and `size`
//! operations and applies them atomically at `commit()`. Each operation
//! hands back a [`ResultCell`] that is filled once the transaction commits.
//!
//! Two isolation strategies are provided:
//!
//! - **Pessimistic** ([`PessimisticMap`]): two-phase locking over per-key
//!   guards, one guard per key and operation bucket plus a map-wide size
//!   guard. Guards are taken in a single global order, so transactions never
//!   deadlock. Reads waiting on a writer can time out, which aborts the
//!   transaction.
//! - **Flat-combined** ([`FlatCombinedMap`]): a whole batch is one action on
//!   a flat combiner that owns the map, so batches are applied one at a
//!   time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PessimisticMap                        │
//! │                                                              │
//! │  Transaction ──commit──▶ validate ──▶ execute ──▶ release    │
//! │       │                     │            │                   │
//! │       ▼                     ▼            ▼                   │
//! │ ┌────────────┐      ┌──────────────┐  ┌──────────────┐       │
//! │ │ Operation  │      │ KeyRegistry  │  │  DashMap     │       │
//! │ │ ResultCell │      │  └─ Guard    │  │  (entries)   │       │
//! │ └────────────┘      └──────────────┘  └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       FlatCombinedMap                        │
//! │                                                              │
//! │  FlatTransaction ──commit──▶ FlatCombiner<HashMap<K, V>>     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use txmap_txn::PessimisticMap;
//!
//! let map: PessimisticMap<&str, i32> = PessimisticMap::new();
//!
//! let mut tx = map.begin_tx();
//! let previous = tx.put("a", 1).unwrap();
//! let present = tx.contains_key("a").unwrap();
//! let size = tx.size().unwrap();
//! tx.commit().unwrap();
//!
//! assert_eq!(previous.get(), Some(None));
//! assert_eq!(present.get(), Some(true));
//! assert_eq!(size.get(), Some(1));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Write-once result cells.
pub mod cell;

/// Pessimistic transactions and the map that runs them.
///
/// This module provides:
/// - [`engine::PessimisticMap`]: the shared map handle
/// - [`engine::Transaction`]: a transaction and its lifecycle
/// - [`engine::TransactionState`]: transaction and operation states
pub mod engine;

/// Transaction errors.
pub mod error;

/// Flat-combined transactions.
pub mod flat;

/// Reader/writer guards.
pub mod guard;

/// The surface shared by both map variants.
pub mod map;

/// Queued map operations.
pub mod op;

/// Per-key guard registry.
pub mod registry;

// Re-export commonly used types

pub use cell::ResultCell;

pub use engine::{ChildTransaction, EngineStats, PessimisticMap, Transaction, TransactionState};

pub use error::{AbortReason, TransactionError, TxnResult};

pub use flat::{FlatCombinedMap, FlatTransaction, Session};

pub use guard::{Guard, LatchStatus};

pub use map::{Isolation, MapTransaction, TransactionalMap};

pub use op::{Bucket, ModifyKind, Operation};

pub use registry::{KeyGuards, KeyRegistry};

pub use txmap_common::config::{CombinerConfig, CombinerKind, EngineConfig, RegistryPolicy};
