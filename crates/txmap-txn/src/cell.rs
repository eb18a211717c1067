//! Single-assignment result cells.

use std::fmt;
use std::sync::{Arc, OnceLock};

/// The outcome of one operation inside a transaction.
///
/// A cell is handed out when the operation is registered and is completed
/// exactly once, when the owning transaction commits. Reading never blocks:
/// until then [`get`](Self::get) returns `None`, and if the transaction
/// aborts the cell stays empty forever.
pub struct ResultCell<T> {
    slot: Arc<OnceLock<T>>,
}

impl<T> ResultCell<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Stores the outcome.
    ///
    /// # Panics
    ///
    /// Panics if the cell was already completed. Every operation is executed
    /// once per commit, so a second completion means the engine is broken.
    pub(crate) fn complete(&self, value: T) {
        if self.slot.set(value).is_err() {
            panic!("result cell completed twice");
        }
    }

    /// Returns true once the owning transaction has committed.
    pub fn is_completed(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Returns a reference to the outcome, if completed.
    pub fn peek(&self) -> Option<&T> {
        self.slot.get()
    }
}

impl<T: Clone> ResultCell<T> {
    /// Returns a copy of the outcome, or `None` if not completed yet.
    pub fn get(&self) -> Option<T> {
        self.slot.get().cloned()
    }
}

impl<T> Clone for ResultCell<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ResultCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Some(value) => f.debug_tuple("ResultCell").field(value).finish(),
            None => f.write_str("ResultCell(<pending>)"),
        }
    }
}
