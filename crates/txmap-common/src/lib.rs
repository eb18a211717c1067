//! # txmap-common
//!
//! Common types, configuration, and constants shared by the txmap crates.
//!
//! This crate provides the foundational pieces used by both the
//! transaction engine and the flat combiners:
//!
//! - **Types**: Transaction identifiers (`TxnId`)
//! - **Config**: `EngineConfig` for the two-phase-locked map and
//!   `CombinerConfig` for the flat combiners
//! - **Errors**: `ConfigError` returned by configuration validation
//! - **Constants**: Default spin limits, thresholds, and capacities
//!
//! ## Example
//!
//! ```rust
//! use txmap_common::config::{CombinerConfig, CombinerKind, EngineConfig};
//! use txmap_common::types::TxnId;
//!
//! let engine = EngineConfig::default();
//! assert!(engine.validate().is_ok());
//!
//! let combiner = CombinerConfig::new(CombinerKind::Array).with_capacity(64);
//! assert!(combiner.validate().is_ok());
//!
//! let txn = TxnId::new(1);
//! assert_eq!(txn.to_string(), "1");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{CombinerConfig, CombinerKind, EngineConfig, RegistryPolicy};
pub use constants::*;
pub use error::{ConfigError, ConfigResult};
pub use types::TxnId;
