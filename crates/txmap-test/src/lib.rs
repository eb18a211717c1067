//! # txmap-test
//!
//! Cross-crate tests for txmap.
//!
//! This crate contains:
//! - Seeded workload generators
//! - Helpers for running threads under a deadline
//! - Stress tests for both map variants and every combiner (`tests/`)

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;

/// Workload generators
pub mod workload;
