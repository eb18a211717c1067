//! Flat combiner configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{
    DEFAULT_COMBINER_CAPACITY, DEFAULT_COMBINE_THRESHOLD, DEFAULT_SPIN_LIMIT,
    MAX_COMBINER_CAPACITY,
};
use crate::error::{ConfigError, ConfigResult};

/// Which flat combining algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CombinerKind {
    /// Unbounded linked publication list with age-based node unlinking.
    #[default]
    Linked,
    /// Bounded circular array of publication slots.
    Array,
    /// Lock-free queue where the combiner role is handed from node to node.
    Handoff,
}

impl fmt::Display for CombinerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinerKind::Linked => write!(f, "linked"),
            CombinerKind::Array => write!(f, "array"),
            CombinerKind::Handoff => write!(f, "handoff"),
        }
    }
}

/// Configuration for a flat combiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinerConfig {
    /// The combining algorithm.
    pub kind: CombinerKind,

    /// Linked: rounds before idle nodes are unlinked.
    /// Handoff: maximum actions applied per combiner turn.
    pub threshold: usize,

    /// Array: number of publication slots.
    pub capacity: usize,

    /// Busy-wait iterations before a waiting participant yields.
    pub spin_limit: u32,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self::new(CombinerKind::default())
    }
}

impl CombinerConfig {
    /// Creates a configuration for the given algorithm with default tuning.
    #[must_use]
    pub fn new(kind: CombinerKind) -> Self {
        Self {
            kind,
            threshold: DEFAULT_COMBINE_THRESHOLD,
            capacity: DEFAULT_COMBINER_CAPACITY,
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }

    /// Sets the threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the array capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the spin limit.
    #[must_use]
    pub fn with_spin_limit(mut self, spin_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.threshold == 0 {
            return Err(ConfigError::Zero { field: "threshold" });
        }
        if self.capacity == 0 {
            return Err(ConfigError::Zero { field: "capacity" });
        }
        if self.capacity > MAX_COMBINER_CAPACITY {
            return Err(ConfigError::TooLarge {
                field: "capacity",
                value: self.capacity,
                max: MAX_COMBINER_CAPACITY,
            });
        }
        Ok(())
    }
}
