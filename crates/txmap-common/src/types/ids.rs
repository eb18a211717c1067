//! Transaction identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a parent transaction within one map.
///
/// IDs are handed out monotonically, starting at
/// [`FIRST_TXN_ID`](crate::constants::FIRST_TXN_ID). A guard records the ID
/// of the transaction holding its latch so that transaction's own reads pass
/// through.
///
/// # Example
///
/// ```rust
/// use txmap_common::types::TxnId;
///
/// assert!(TxnId::new(1) < TxnId::new(2));
/// assert_eq!(TxnId::new(7).to_string(), "7");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Owner of a latch nobody holds.
    pub const INVALID: Self = Self(0);

    /// Wraps a raw ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TxnId(INVALID)")
        } else {
            write!(f, "TxnId({})", self.0)
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
