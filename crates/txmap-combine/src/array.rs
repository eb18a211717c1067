//! Bounded circular-array flat combiner.
//!
//! A submission takes a ticket, and the ticket modulo the capacity picks
//! the slot the publication is placed in. A slot holds at most one
//! publication; a submitter that finds its slot taken helps drain the
//! array and retries with a fresh ticket. The combiner visits every slot,
//! starting where the previous round left off, so all occupied slots are
//! applied in each round.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::trace;

use txmap_common::config::{CombinerConfig, CombinerKind};
use txmap_common::error::ConfigResult;

use crate::publication::{package, spin_then_yield, take_result, Publication};
use crate::stats::CombinerStats;
use crate::{Combiner, Participant};

struct Inner<R> {
    resource: Mutex<R>,
    slots: Box<[ArcSwapOption<Publication<R>>]>,
    tickets: AtomicUsize,
    /// Slot the next round starts scanning from.
    cursor: AtomicUsize,
    spin_limit: u32,
    stats: CombinerStats,
}

impl<R> Inner<R> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Tries to place `record` in the slot picked by the next ticket.
    fn try_place(&self, record: &Arc<Publication<R>>) -> bool {
        let index = self.tickets.fetch_add(1, Ordering::Relaxed) % self.capacity();
        let previous = self.slots[index].compare_and_swap(
            &None::<Arc<Publication<R>>>,
            Some(Arc::clone(record)),
        );
        previous.is_none()
    }

    fn scan_combine_apply(&self, resource: &mut R) {
        self.stats.enter_combining();
        let capacity = self.capacity();
        let start = self.cursor.load(Ordering::Relaxed);

        let mut applied = 0;
        let mut last = start;
        for offset in 0..capacity {
            let index = (start + offset) % capacity;
            if let Some(record) = self.slots[index].swap(None) {
                if record.try_apply(resource) {
                    applied += 1;
                }
                last = index;
            }
        }
        self.cursor.store((last + 1) % capacity, Ordering::Relaxed);

        self.stats.record_round();
        self.stats.record_applied(applied);
        self.stats.exit_combining();
    }

    fn try_combine(&self) -> bool {
        match self.resource.try_lock() {
            Some(mut resource) => {
                self.scan_combine_apply(&mut resource);
                true
            }
            None => false,
        }
    }
}

/// Bounded circular-array flat combiner.
pub struct ArrayCombiner<R> {
    inner: Arc<Inner<R>>,
}

impl<R: Send + 'static> ArrayCombiner<R> {
    /// Creates a combiner with the default capacity.
    pub fn new(resource: R) -> Self {
        Self::build(resource, &CombinerConfig::new(CombinerKind::Array))
    }

    /// Creates a combiner from a validated configuration.
    pub fn with_config(resource: R, config: &CombinerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::build(resource, config))
    }

    fn build(resource: R, config: &CombinerConfig) -> Self {
        let slots = (0..config.capacity)
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        trace!(capacity = config.capacity, "created array combiner");
        Self {
            inner: Arc::new(Inner {
                resource: Mutex::new(resource),
                slots,
                tickets: AtomicUsize::new(0),
                cursor: AtomicUsize::new(0),
                spin_limit: config.spin_limit,
                stats: CombinerStats::new(),
            }),
        }
    }

    /// Returns the number of publication slots.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<R> Clone for ArrayCombiner<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Send + 'static> Combiner<R> for ArrayCombiner<R> {
    type Participant = ArrayParticipant<R>;

    fn register(&self) -> ArrayParticipant<R> {
        self.inner.stats.record_participant();
        ArrayParticipant {
            inner: Arc::clone(&self.inner),
            record: Arc::new(Publication::new()),
        }
    }

    fn kind(&self) -> CombinerKind {
        CombinerKind::Array
    }

    fn stats(&self) -> &CombinerStats {
        &self.inner.stats
    }
}

impl<R> std::fmt::Debug for ArrayCombiner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayCombiner")
            .field("capacity", &self.inner.capacity())
            .field("cursor", &self.inner.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

/// A participant of an [`ArrayCombiner`].
pub struct ArrayParticipant<R> {
    inner: Arc<Inner<R>>,
    record: Arc<Publication<R>>,
}

impl<R: Send + 'static> Participant<R> for ArrayParticipant<R> {
    fn combine<T, F>(&mut self, action: F) -> T
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, slot) = package(action);
        self.record.publish(job);

        while !self.inner.try_place(&self.record) {
            // Array is full: drain it ourselves if nobody else is.
            if !self.inner.try_combine() {
                std::thread::yield_now();
            }
        }

        loop {
            if self.inner.try_combine() && self.record.is_applied() {
                break;
            }
            if spin_then_yield(self.inner.spin_limit, || self.record.is_applied()) {
                break;
            }
        }

        take_result(&slot)
    }
}
