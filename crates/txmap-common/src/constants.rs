//! System-wide constants for txmap.
//!
//! Defaults for the transaction engine and the flat combiners. Every value
//! here can be overridden through the structures in [`crate::config`].

// =============================================================================
// Flat Combining Constants
// =============================================================================

/// Number of busy-wait iterations a waiting participant performs before it
/// yields the CPU.
pub const DEFAULT_SPIN_LIMIT: u32 = 256;

/// Number of combining rounds after which the linked combiner starts
/// unlinking publication nodes that have been idle for as many rounds.
///
/// The handoff combiner uses the same value as the maximum number of
/// actions one combiner applies before handing the role on.
pub const DEFAULT_COMBINE_THRESHOLD: usize = 100;

/// Number of slots in the array combiner.
pub const DEFAULT_COMBINER_CAPACITY: usize = 100;

/// Upper bound on the array combiner capacity.
pub const MAX_COMBINER_CAPACITY: usize = 1 << 16;

// =============================================================================
// Transaction Engine Constants
// =============================================================================

/// Number of busy-wait iterations a writer spends waiting for readers to
/// drain from a guard before it starts yielding.
pub const DEFAULT_DRAIN_SPIN_LIMIT: u32 = 64;

/// Initial transaction ID handed out by a freshly created map.
pub const FIRST_TXN_ID: u64 = 1;
