//! Handoff flat combiner.
//!
//! Submissions form a lock-free queue. Each participant owns one spare
//! node; to submit it swaps the spare in as the new tail, writes its job
//! into the node it got back and links the spare behind it. The node it
//! got back is now its own, and becomes its spare for the next call.
//!
//! Whoever finds its node released without the job applied is the
//! combiner. It applies up to `threshold` queued jobs, releasing each
//! owner as it goes, and then releases the next node unapplied, which
//! hands the combiner role to that node's owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use tracing::trace;

use txmap_common::config::{CombinerConfig, CombinerKind};
use txmap_common::error::ConfigResult;

use crate::publication::{package, spin_then_yield, take_result, Publication};
use crate::stats::CombinerStats;
use crate::{Combiner, Participant};

struct Node<R> {
    publication: Publication<R>,
    next: ArcSwapOption<Node<R>>,
    /// Cleared when the owner may proceed, either applied or as combiner.
    waiting: AtomicBool,
}

impl<R> Node<R> {
    fn new(waiting: bool) -> Self {
        Self {
            publication: Publication::new(),
            next: ArcSwapOption::empty(),
            waiting: AtomicBool::new(waiting),
        }
    }
}

struct Inner<R> {
    /// Only ever locked by the thread holding the combiner role.
    resource: Mutex<R>,
    tail: ArcSwap<Node<R>>,
    threshold: usize,
    spin_limit: u32,
    stats: CombinerStats,
}

impl<R> Inner<R> {
    /// Runs a combiner turn starting at `first`, the caller's own node.
    fn combine_from(&self, first: Arc<Node<R>>) {
        let mut resource = self.resource.lock();
        self.stats.enter_combining();

        let mut applied = 0;
        let mut current = first;
        for _ in 0..self.threshold {
            // `next` is linked only after the job is published.
            let Some(next) = current.next.load_full() else {
                break;
            };
            if current.publication.try_apply(&mut resource) {
                applied += 1;
            }
            current.waiting.store(false, Ordering::Release);
            current = next;
        }

        self.stats.record_round();
        self.stats.record_applied(applied);
        self.stats.exit_combining();
        drop(resource);

        trace!(applied, "handing off combiner role");
        current.waiting.store(false, Ordering::Release);
    }
}

/// Flat combiner that hands the combiner role along a queue.
pub struct HandoffCombiner<R> {
    inner: Arc<Inner<R>>,
}

impl<R: Send + 'static> HandoffCombiner<R> {
    /// Creates a combiner with default configuration.
    pub fn new(resource: R) -> Self {
        Self::build(resource, &CombinerConfig::new(CombinerKind::Handoff))
    }

    /// Creates a combiner from a validated configuration.
    pub fn with_config(resource: R, config: &CombinerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::build(resource, config))
    }

    fn build(resource: R, config: &CombinerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                resource: Mutex::new(resource),
                // The first submitter finds this node released and combines.
                tail: ArcSwap::from_pointee(Node::new(false)),
                threshold: config.threshold,
                spin_limit: config.spin_limit,
                stats: CombinerStats::new(),
            }),
        }
    }
}

impl<R> Clone for HandoffCombiner<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Send + 'static> Combiner<R> for HandoffCombiner<R> {
    type Participant = HandoffParticipant<R>;

    fn register(&self) -> HandoffParticipant<R> {
        self.inner.stats.record_participant();
        HandoffParticipant {
            inner: Arc::clone(&self.inner),
            spare: Arc::new(Node::new(true)),
        }
    }

    fn kind(&self) -> CombinerKind {
        CombinerKind::Handoff
    }

    fn stats(&self) -> &CombinerStats {
        &self.inner.stats
    }
}

impl<R> std::fmt::Debug for HandoffCombiner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffCombiner")
            .field("threshold", &self.inner.threshold)
            .finish()
    }
}

/// A participant of a [`HandoffCombiner`].
pub struct HandoffParticipant<R> {
    inner: Arc<Inner<R>>,
    spare: Arc<Node<R>>,
}

impl<R: Send + 'static> Participant<R> for HandoffParticipant<R> {
    fn combine<T, F>(&mut self, action: F) -> T
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, slot) = package(action);

        let fresh = Arc::clone(&self.spare);
        fresh.next.store(None);
        fresh.waiting.store(true, Ordering::Relaxed);

        let mine = self.inner.tail.swap(Arc::clone(&fresh));
        mine.publication.publish(job);
        mine.next.store(Some(fresh));
        self.spare = Arc::clone(&mine);

        while !spin_then_yield(self.inner.spin_limit, || {
            !mine.waiting.load(Ordering::Acquire)
        }) {}

        if !mine.publication.is_applied() {
            self.inner.combine_from(mine);
        }

        take_result(&slot)
    }
}
