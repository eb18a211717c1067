//! Runtime selection of a combiner variant.

use std::fmt;

use tracing::debug;

use txmap_common::config::{CombinerConfig, CombinerKind};
use txmap_common::error::ConfigResult;

use crate::array::{ArrayCombiner, ArrayParticipant};
use crate::handoff::{HandoffCombiner, HandoffParticipant};
use crate::linked::{LinkedCombiner, LinkedParticipant};
use crate::stats::CombinerStats;
use crate::{Combiner, Participant};

/// A combiner whose algorithm is picked from a [`CombinerConfig`].
pub enum FlatCombiner<R> {
    /// Linked publication list.
    Linked(LinkedCombiner<R>),
    /// Circular array of slots.
    Array(ArrayCombiner<R>),
    /// Handoff queue.
    Handoff(HandoffCombiner<R>),
}

impl<R: Send + 'static> FlatCombiner<R> {
    /// Builds the variant named by `config.kind`.
    pub fn new(resource: R, config: &CombinerConfig) -> ConfigResult<Self> {
        let combiner = match config.kind {
            CombinerKind::Linked => Self::Linked(LinkedCombiner::with_config(resource, config)?),
            CombinerKind::Array => Self::Array(ArrayCombiner::with_config(resource, config)?),
            CombinerKind::Handoff => {
                Self::Handoff(HandoffCombiner::with_config(resource, config)?)
            }
        };
        debug!(kind = %config.kind, threshold = config.threshold, "created flat combiner");
        Ok(combiner)
    }
}

impl<R> Clone for FlatCombiner<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Linked(c) => Self::Linked(c.clone()),
            Self::Array(c) => Self::Array(c.clone()),
            Self::Handoff(c) => Self::Handoff(c.clone()),
        }
    }
}

impl<R: Send + 'static> Combiner<R> for FlatCombiner<R> {
    type Participant = FlatParticipant<R>;

    fn register(&self) -> FlatParticipant<R> {
        match self {
            Self::Linked(c) => FlatParticipant::Linked(c.register()),
            Self::Array(c) => FlatParticipant::Array(c.register()),
            Self::Handoff(c) => FlatParticipant::Handoff(c.register()),
        }
    }

    fn kind(&self) -> CombinerKind {
        match self {
            Self::Linked(c) => c.kind(),
            Self::Array(c) => c.kind(),
            Self::Handoff(c) => c.kind(),
        }
    }

    fn stats(&self) -> &CombinerStats {
        match self {
            Self::Linked(c) => c.stats(),
            Self::Array(c) => c.stats(),
            Self::Handoff(c) => c.stats(),
        }
    }
}

impl<R> fmt::Debug for FlatCombiner<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linked(c) => fmt::Debug::fmt(c, f),
            Self::Array(c) => fmt::Debug::fmt(c, f),
            Self::Handoff(c) => fmt::Debug::fmt(c, f),
        }
    }
}

/// A participant of a [`FlatCombiner`].
pub enum FlatParticipant<R> {
    /// Linked participant.
    Linked(LinkedParticipant<R>),
    /// Array participant.
    Array(ArrayParticipant<R>),
    /// Handoff participant.
    Handoff(HandoffParticipant<R>),
}

impl<R: Send + 'static> Participant<R> for FlatParticipant<R> {
    fn combine<T, F>(&mut self, action: F) -> T
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        match self {
            Self::Linked(p) => p.combine(action),
            Self::Array(p) => p.combine(action),
            Self::Handoff(p) => p.combine(action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use txmap_common::error::ConfigError;

    const KINDS: [CombinerKind; 3] = [
        CombinerKind::Linked,
        CombinerKind::Array,
        CombinerKind::Handoff,
    ];

    #[test]
    fn test_builds_requested_kind() {
        for kind in KINDS {
            let combiner = FlatCombiner::new(0u32, &CombinerConfig::new(kind)).unwrap();
            assert_eq!(combiner.kind(), kind);
            let mut participant = combiner.register();
            assert_eq!(participant.combine(|n: &mut u32| *n + 1), 1);
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CombinerConfig::new(CombinerKind::Linked).with_threshold(0);
        assert_eq!(
            FlatCombiner::new(0u32, &config).unwrap_err(),
            ConfigError::Zero { field: "threshold" }
        );
    }

    #[test]
    fn test_every_kind_exactly_once() {
        for kind in KINDS {
            let config = CombinerConfig::new(kind).with_capacity(4).with_threshold(8);
            let combiner = FlatCombiner::new(testing::Guarded::default(), &config).unwrap();
            testing::exactly_once(combiner, 6, 500);
        }
    }

    #[test]
    fn test_panicking_action_does_not_poison() {
        for kind in KINDS {
            let combiner = FlatCombiner::new(0u32, &CombinerConfig::new(kind)).unwrap();
            let mut participant = combiner.register();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                participant.combine(|_: &mut u32| -> u32 { panic!("action failed") })
            }));
            assert!(outcome.is_err());
            assert_eq!(participant.combine(|n: &mut u32| *n + 7), 7);
        }
    }
}
