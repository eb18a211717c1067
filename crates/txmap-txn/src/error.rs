//! Transaction errors.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use txmap_common::types::TxnId;

use crate::engine::TransactionState;
use crate::op::Bucket;

/// Why a transaction was rolled back at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AbortReason {
    /// A read waited on another transaction's write latch for longer than
    /// the configured timeout.
    ReadTimedOut {
        /// Bucket of the guard the read was waiting on.
        bucket: Bucket,
        /// The configured wait limit.
        waited: Duration,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ReadTimedOut { bucket, waited } => write!(
                f,
                "{} read waited {:?} on a writer latch",
                bucket, waited
            ),
        }
    }
}

/// Errors returned by transaction operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The transaction could not validate and was rolled back. None of its
    /// result cells were completed.
    #[error("transaction {txn_id} aborted: {reason}")]
    Aborted {
        /// The transaction ID.
        txn_id: TxnId,
        /// What forced the abort.
        reason: AbortReason,
    },

    /// The call is not allowed in the transaction's current state.
    #[error("transaction {txn_id} in invalid state {current}, expected {expected}")]
    InvalidState {
        /// The transaction ID.
        txn_id: TxnId,
        /// The current state.
        current: TransactionState,
        /// The expected state(s).
        expected: &'static str,
    },
}

impl TransactionError {
    /// Returns the transaction the error belongs to.
    pub fn txn_id(&self) -> TxnId {
        match self {
            TransactionError::Aborted { txn_id, .. }
            | TransactionError::InvalidState { txn_id, .. } => *txn_id,
        }
    }

    /// Returns true if the error is an abort rather than misuse.
    pub fn is_abort(&self) -> bool {
        matches!(self, TransactionError::Aborted { .. })
    }
}

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TransactionError>;
