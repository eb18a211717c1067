//! Error handling for txmap configuration.
//!
//! Runtime errors of the transaction engine live with the engine in
//! `txmap-txn`; this module only covers values rejected by
//! `validate()` on the configuration structures.

use thiserror::Error;

/// Result type alias for configuration validation.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors produced when a configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A numeric setting must be strictly positive.
    #[error("{field} must be greater than zero")]
    Zero {
        /// The offending field.
        field: &'static str,
    },

    /// A numeric setting exceeds its allowed maximum.
    #[error("{field} is {value}, maximum is {max}")]
    TooLarge {
        /// The offending field.
        field: &'static str,
        /// The configured value.
        value: usize,
        /// The allowed maximum.
        max: usize,
    },

    /// A timeout was configured as a zero duration.
    #[error("{field} must be a non-zero duration")]
    ZeroDuration {
        /// The offending field.
        field: &'static str,
    },
}
