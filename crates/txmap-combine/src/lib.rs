//! # txmap-combine
//!
//! Flat combining for txmap.
//!
//! A flat combiner owns a resource and lets any number of threads submit
//! actions against it. Exactly one thread at a time, the *combiner*, applies
//! every pending action in a batch, so the resource is serialized without a
//! lock handoff per action.
//!
//! - **Linked**: unbounded publication list, idle nodes are unlinked after a
//!   configurable number of rounds ([`LinkedCombiner`]).
//! - **Array**: bounded ring of publication slots ([`ArrayCombiner`]).
//! - **Handoff**: lock-free queue that passes the combiner role from node to
//!   node ([`HandoffCombiner`]).
//!
//! Publication records are not thread-local: every caller registers once and
//! keeps the returned participant for as long as it submits work.
//!
//! # Example
//!
//! ```rust
//! use std::thread;
//! use txmap_combine::{Combiner, LinkedCombiner, Participant};
//!
//! let combiner = LinkedCombiner::new(0u64);
//! let workers: Vec<_> = (0..4)
//!     .map(|_| {
//!         let mut participant = combiner.register();
//!         thread::spawn(move || {
//!             for _ in 0..100 {
//!                 participant.combine(|count: &mut u64| *count += 1);
//!             }
//!         })
//!     })
//!     .collect();
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//!
//! let mut participant = combiner.register();
//! assert_eq!(participant.combine(|count: &mut u64| *count), 400);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod publication;

/// Bounded circular array combiner.
pub mod array;

/// Enum dispatch over the combiner variants.
pub mod flat;

/// Lock-free handoff combiner.
pub mod handoff;

/// Unbounded linked-list combiner.
pub mod linked;

/// Combiner statistics.
pub mod stats;

pub use array::{ArrayCombiner, ArrayParticipant};
pub use flat::{FlatCombiner, FlatParticipant};
pub use handoff::{HandoffCombiner, HandoffParticipant};
pub use linked::{LinkedCombiner, LinkedParticipant};
pub use stats::CombinerStats;
pub use txmap_common::config::{CombinerConfig, CombinerKind};

/// A resource serialized by flat combining.
///
/// The resource is only reachable through actions submitted by a
/// [`Participant`]; there is no accessor that bypasses the combiner.
pub trait Combiner<R>: Clone + Send + Sync {
    /// Per-caller handle holding a reusable publication record.
    type Participant: Participant<R> + 'static;

    /// Registers a new participant.
    fn register(&self) -> Self::Participant;

    /// Returns the algorithm this combiner implements.
    fn kind(&self) -> CombinerKind;

    /// Returns activity counters.
    fn stats(&self) -> &CombinerStats;
}

/// A registered caller of a [`Combiner`].
pub trait Participant<R>: Send {
    /// Applies `action` to the resource and returns its result.
    ///
    /// Blocks until the action has been applied, either by this thread
    /// acting as combiner or by another thread that combined it. A panic
    /// inside `action` is re-raised here.
    fn combine<T, F>(&mut self, action: F) -> T
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared checks run against every combiner variant.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::{Combiner, Participant};

    /// Counter resource that asserts no two actions overlap.
    #[derive(Default)]
    pub struct Guarded {
        pub value: u64,
        pub inside: Arc<AtomicUsize>,
        pub max_inside: Arc<AtomicUsize>,
    }

    impl Guarded {
        pub fn enter(&mut self) {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inside.fetch_max(now, Ordering::SeqCst);
            self.value += 1;
            self.inside.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Runs `threads * ops` increments and checks the total.
    pub fn exactly_once<C>(combiner: C, threads: usize, ops: usize)
    where
        C: Combiner<Guarded> + 'static,
    {
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let mut participant = combiner.register();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..ops {
                        participant.combine(|g: &mut Guarded| g.enter());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut participant = combiner.register();
        let (value, max_inside) = participant.combine(|g: &mut Guarded| {
            (g.value, g.max_inside.load(Ordering::SeqCst))
        });
        assert_eq!(value, (threads * ops) as u64);
        assert!(max_inside <= 1, "two actions overlapped");
        assert!(combiner.stats().peak_combiners() <= 1, "two combiners at once");
        assert_eq!(combiner.stats().applied_count(), (threads * ops + 1) as u64);
    }

    /// Checks every thread gets back the value it asked for.
    pub fn results_routed<C>(combiner: C, threads: usize, ops: usize)
    where
        C: Combiner<Guarded> + 'static,
    {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let mut participant = combiner.register();
                thread::spawn(move || {
                    for i in 0..ops {
                        let expected = t * 1_000_000 + i;
                        let got = participant.combine(move |g: &mut Guarded| {
                            g.enter();
                            expected
                        });
                        assert_eq!(got, expected);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
