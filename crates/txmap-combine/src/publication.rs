//! Publication records shared by every combiner variant.
//!
//! A participant publishes a type-erased [`Job`] into its record and waits
//! for the `applied` flag. The combiner takes the job out exactly once, runs
//! it against the resource and sets `applied` last, so the result written by
//! the job is visible to the participant once it observes the flag.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

/// A type-erased action applied to the resource.
pub(crate) type Job<R> = Box<dyn FnOnce(&mut R) + Send>;

/// Where a job leaves its outcome for the submitting participant.
pub(crate) type ResultSlot<T> = Arc<Mutex<Option<thread::Result<T>>>>;

/// A reusable publication record.
pub(crate) struct Publication<R> {
    job: Mutex<Option<Job<R>>>,
    applied: AtomicBool,
}

impl<R> Publication<R> {
    pub(crate) fn new() -> Self {
        Self {
            job: Mutex::new(None),
            applied: AtomicBool::new(false),
        }
    }

    /// Publishes a job. The applied flag is cleared before the job becomes
    /// visible so a combiner can never set it for the previous round.
    pub(crate) fn publish(&self, job: Job<R>) {
        self.applied.store(false, Ordering::Release);
        *self.job.lock() = Some(job);
    }

    /// Applies the pending job, if any. Returns true when a job ran.
    pub(crate) fn try_apply(&self, resource: &mut R) -> bool {
        let job = self.job.lock().take();
        match job {
            Some(job) => {
                job(resource);
                self.applied.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Returns true while a published job has not been taken yet.
    pub(crate) fn is_pending(&self) -> bool {
        self.job.lock().is_some()
    }

    #[inline]
    pub(crate) fn is_applied(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }
}

/// Wraps a typed action into a job plus the slot its result lands in.
///
/// Panics raised by the action are caught inside the combiner and
/// re-raised on the submitting thread by [`take_result`].
pub(crate) fn package<R, T, F>(action: F) -> (Job<R>, ResultSlot<T>)
where
    F: FnOnce(&mut R) -> T + Send + 'static,
    T: Send + 'static,
{
    let slot: ResultSlot<T> = Arc::new(Mutex::new(None));
    let out = Arc::clone(&slot);
    let job: Job<R> = Box::new(move |resource: &mut R| {
        let result = panic::catch_unwind(AssertUnwindSafe(|| action(resource)));
        *out.lock() = Some(result);
    });
    (job, slot)
}

/// Takes the result out of a slot whose publication has been applied.
pub(crate) fn take_result<T>(slot: &ResultSlot<T>) -> T {
    match slot.lock().take() {
        Some(Ok(value)) => value,
        Some(Err(payload)) => panic::resume_unwind(payload),
        None => unreachable!("combiner marked a publication applied without a result"),
    }
}

/// Busy-waits up to `spin_limit` iterations for `done`, then yields once.
///
/// Returns the final value of `done`.
pub(crate) fn spin_then_yield(spin_limit: u32, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..spin_limit {
        if done() {
            return true;
        }
        std::hint::spin_loop();
    }
    thread::yield_now();
    done()
}
