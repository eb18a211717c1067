//! Combiner statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters describing combiner activity.
#[derive(Debug, Default)]
pub struct CombinerStats {
    /// Combining rounds run (one per successful election).
    pub rounds: AtomicU64,
    /// Actions applied to the resource.
    pub applied: AtomicU64,
    /// Publication nodes unlinked because they went idle.
    pub unlinked: AtomicU64,
    /// Participants registered.
    pub participants: AtomicU64,
    /// Threads currently inside the combining section.
    active: AtomicUsize,
    /// Highest number of threads ever seen inside the combining section.
    peak_active: AtomicUsize,
}

impl CombinerStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a combining round.
    pub fn record_round(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Records applied actions.
    pub fn record_applied(&self, count: u64) {
        self.applied.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an unlinked node.
    pub fn record_unlinked(&self) {
        self.unlinked.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a registration.
    pub fn record_participant(&self) {
        self.participants.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks the calling thread as the active combiner.
    pub(crate) fn enter_combining(&self) {
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_active.fetch_max(now, Ordering::AcqRel);
    }

    /// Marks the end of a combining section.
    pub(crate) fn exit_combining(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns the highest number of simultaneous combiners observed.
    ///
    /// Anything above one means the single-combiner invariant was broken.
    pub fn peak_combiners(&self) -> usize {
        self.peak_active.load(Ordering::Acquire)
    }

    /// Returns the number of applied actions.
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Returns the number of combining rounds.
    pub fn round_count(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }
}
