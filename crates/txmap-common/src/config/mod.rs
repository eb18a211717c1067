//! Configuration for txmap.
//!
//! This module provides configuration structures for the transaction engine
//! and the flat combiners.

mod combiner;
mod engine;

pub use combiner::{CombinerConfig, CombinerKind};
pub use engine::{EngineConfig, RegistryPolicy};
