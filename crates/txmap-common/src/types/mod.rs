//! Type definitions for txmap.

mod ids;

pub use ids::TxnId;
