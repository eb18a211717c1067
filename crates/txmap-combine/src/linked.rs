//! Linked-list flat combiner.
//!
//! Participants push their publication node onto the head of a singly
//! linked list once and keep it there across calls. The thread that wins
//! `try_lock` on the resource becomes the combiner for the round: it walks
//! the list from the head it observed and applies every pending job.
//!
//! ```text
//!   head ──▶ [P3] ──▶ [P1] ──▶ [P2] ──▶ ∅
//!             job      idle     job
//! ```
//!
//! Nodes are never removed while a participant is waiting on them. Once
//! more than `threshold` rounds have run, a node whose last job was applied
//! at least `threshold` rounds ago is unlinked; its owner notices the
//! cleared `linked` flag on its next submission (or while spinning) and
//! pushes it back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::trace;

use txmap_common::config::{CombinerConfig, CombinerKind};
use txmap_common::error::ConfigResult;

use crate::publication::{package, spin_then_yield, take_result, Publication};
use crate::stats::CombinerStats;
use crate::{Combiner, Participant};

/// A participant's node in the publication list.
struct Node<R> {
    publication: Publication<R>,
    next: ArcSwapOption<Node<R>>,
    linked: AtomicBool,
    /// Round in which this node's last job was applied.
    last_round: AtomicU64,
}

impl<R> Node<R> {
    fn new() -> Self {
        Self {
            publication: Publication::new(),
            next: ArcSwapOption::empty(),
            linked: AtomicBool::new(false),
            last_round: AtomicU64::new(0),
        }
    }
}

struct Inner<R> {
    /// `try_lock` on this mutex is the combiner election.
    resource: Mutex<R>,
    head: ArcSwapOption<Node<R>>,
    /// Completed rounds. Only advanced by the combiner.
    rounds: AtomicU64,
    threshold: u64,
    spin_limit: u32,
    stats: CombinerStats,
}

impl<R> Inner<R> {
    /// Pushes `node` at the head of the list.
    fn link(&self, node: &Arc<Node<R>>) {
        node.last_round
            .store(self.rounds.load(Ordering::Acquire), Ordering::Relaxed);
        node.linked.store(true, Ordering::Release);
        self.head.rcu(|head| {
            node.next.store(head.clone());
            Some(Arc::clone(node))
        });
    }

    /// Applies every pending job reachable from the current head.
    fn scan_combine_apply(&self, resource: &mut R) {
        self.stats.enter_combining();
        let round = self.rounds.fetch_add(1, Ordering::AcqRel) + 1;
        let seen_head = self.head.load_full();

        let mut applied = 0;
        let mut cursor = seen_head.clone();
        while let Some(node) = cursor {
            if node.publication.try_apply(resource) {
                node.last_round.store(round, Ordering::Relaxed);
                applied += 1;
            }
            cursor = node.next.load_full();
        }

        self.stats.record_round();
        self.stats.record_applied(applied);

        if round > self.threshold {
            if let Some(head) = seen_head {
                self.unlink_idle(&head, round);
            }
        }
        self.stats.exit_combining();
    }

    /// Unlinks nodes behind `head` that have been idle for `threshold`
    /// rounds. The head itself stays, since new nodes are pushed in front
    /// of it concurrently.
    fn unlink_idle(&self, head: &Arc<Node<R>>, round: u64) {
        let mut prev = Arc::clone(head);
        let mut current = prev.next.load_full();
        while let Some(node) = current {
            let idle =
                round.saturating_sub(node.last_round.load(Ordering::Relaxed)) >= self.threshold;
            if idle && !node.publication.is_pending() {
                let next = node.next.load_full();
                prev.next.store(next.clone());
                node.next.store(None);
                // Cleared after the node is unreachable so its owner never
                // re-links a node that is still in the list.
                node.linked.store(false, Ordering::Release);
                self.stats.record_unlinked();
                trace!(round, "unlinked idle publication node");
                current = next;
                continue;
            }
            current = node.next.load_full();
            prev = node;
        }
    }
}

/// Unbounded linked-list flat combiner.
pub struct LinkedCombiner<R> {
    inner: Arc<Inner<R>>,
}

impl<R: Send + 'static> LinkedCombiner<R> {
    /// Creates a combiner with default configuration.
    pub fn new(resource: R) -> Self {
        Self::build(resource, &CombinerConfig::new(CombinerKind::Linked))
    }

    /// Creates a combiner with a custom threshold and spin limit.
    pub fn with_config(resource: R, config: &CombinerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::build(resource, config))
    }

    fn build(resource: R, config: &CombinerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                resource: Mutex::new(resource),
                head: ArcSwapOption::empty(),
                rounds: AtomicU64::new(0),
                threshold: config.threshold as u64,
                spin_limit: config.spin_limit,
                stats: CombinerStats::new(),
            }),
        }
    }

    /// Returns the number of nodes currently linked.
    pub fn linked_nodes(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.inner.head.load_full();
        while let Some(node) = cursor {
            count += 1;
            cursor = node.next.load_full();
        }
        count
    }
}

impl<R> Clone for LinkedCombiner<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Send + 'static> Combiner<R> for LinkedCombiner<R> {
    type Participant = LinkedParticipant<R>;

    fn register(&self) -> LinkedParticipant<R> {
        self.inner.stats.record_participant();
        LinkedParticipant {
            inner: Arc::clone(&self.inner),
            node: Arc::new(Node::new()),
        }
    }

    fn kind(&self) -> CombinerKind {
        CombinerKind::Linked
    }

    fn stats(&self) -> &CombinerStats {
        &self.inner.stats
    }
}

impl<R> std::fmt::Debug for LinkedCombiner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedCombiner")
            .field("rounds", &self.inner.rounds.load(Ordering::Relaxed))
            .field("threshold", &self.inner.threshold)
            .finish()
    }
}

/// A participant of a [`LinkedCombiner`].
pub struct LinkedParticipant<R> {
    inner: Arc<Inner<R>>,
    node: Arc<Node<R>>,
}

impl<R: Send + 'static> Participant<R> for LinkedParticipant<R> {
    fn combine<T, F>(&mut self, action: F) -> T
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, slot) = package(action);
        let node = &self.node;
        node.publication.publish(job);
        if !node.linked.load(Ordering::Acquire) {
            self.inner.link(node);
        }

        loop {
            if let Some(mut resource) = self.inner.resource.try_lock() {
                self.inner.scan_combine_apply(&mut resource);
                drop(resource);
                if node.publication.is_applied() {
                    break;
                }
            }

            if spin_then_yield(self.inner.spin_limit, || node.publication.is_applied()) {
                break;
            }

            // A combiner may have unlinked us between our check and its scan.
            if !node.linked.load(Ordering::Acquire) {
                self.inner.link(node);
            }
        }

        take_result(&slot)
    }
}
