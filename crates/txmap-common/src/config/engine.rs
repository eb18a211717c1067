//! Transaction engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::DEFAULT_DRAIN_SPIN_LIMIT;
use crate::error::{ConfigError, ConfigResult};

/// What the key registry does with guards that are no longer in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegistryPolicy {
    /// Guards are created on first use and never removed.
    ///
    /// Memory grows with the number of distinct keys ever touched.
    #[default]
    Retain,
    /// A key's guards are dropped once every one of them is idle and no
    /// transaction still references them.
    EvictIdle,
}

/// Configuration for the two-phase-locked transactional map.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use txmap_common::config::{EngineConfig, RegistryPolicy};
///
/// let config = EngineConfig::default()
///     .with_latch_wait_timeout(Duration::from_millis(50))
///     .with_registry_policy(RegistryPolicy::EvictIdle);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a reader waits on a conflicting writer's latch before its
    /// child transaction aborts. `None` waits until the writer releases.
    pub latch_wait_timeout: Option<Duration>,

    /// Busy-wait iterations a writer spends draining readers from a guard
    /// before it starts yielding.
    pub drain_spin_limit: u32,

    /// Eviction policy of the key registry.
    pub registry_policy: RegistryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latch_wait_timeout: None,
            drain_spin_limit: DEFAULT_DRAIN_SPIN_LIMIT,
            registry_policy: RegistryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the reader latch wait timeout.
    #[must_use]
    pub fn with_latch_wait_timeout(mut self, timeout: Duration) -> Self {
        self.latch_wait_timeout = Some(timeout);
        self
    }

    /// Sets the writer drain spin limit.
    #[must_use]
    pub fn with_drain_spin_limit(mut self, limit: u32) -> Self {
        self.drain_spin_limit = limit;
        self
    }

    /// Sets the registry eviction policy.
    #[must_use]
    pub fn with_registry_policy(mut self, policy: RegistryPolicy) -> Self {
        self.registry_policy = policy;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.latch_wait_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroDuration {
                field: "latch_wait_timeout",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.latch_wait_timeout, None);
        assert_eq!(config.registry_policy, RegistryPolicy::Retain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig::default().with_latch_wait_timeout(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "latch_wait_timeout"
            })
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = EngineConfig::default()
            .with_registry_policy(RegistryPolicy::EvictIdle)
            .with_latch_wait_timeout(Duration::from_millis(5));
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
