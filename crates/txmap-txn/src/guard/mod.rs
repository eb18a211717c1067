//! Reader/writer guards for one `(key, bucket)` slot.
//!
//! A guard combines three pieces of state:
//!
//! - an exclusive write lock, owned by one transaction at a time,
//! - a count of readers currently validated against the guard,
//! - a latch `{status, owner, gate}` that tells readers a writer is active.
//!
//! ```text
//!   writer                               reader
//!   ──────                               ──────
//!   lock write                           readers += 1
//!   latch = Held(owner, new gate)        latch Held by other?
//!   wait for readers == 0                  yes: readers -= 1, wait gate, retry
//!   ... execute ...                        no:  validated
//!   latch = Free, open old gate          ... execute ...
//!   unlock write                         readers -= 1
//! ```
//!
//! The reader increments before it looks at the latch and the writer
//! publishes the latch before it looks at the count, so at least one of
//! them always sees the other. Release sets the latch `Free` before the old
//! gate opens, so a woken reader never finds a stale `Held`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use txmap_common::types::TxnId;

/// Whether a writer currently holds a guard's latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchStatus {
    /// No writer; readers pass straight through.
    Free,
    /// A writer owns the guard; other transactions' readers wait.
    Held,
}

/// One-shot signal readers wait on while a writer holds the latch.
struct Gate {
    opened: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            opened: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn open(&self) {
        let mut opened = self.opened.lock();
        *opened = true;
        self.cond.notify_all();
    }

    /// Blocks until the gate opens. Returns false if `deadline` passed first.
    fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut opened = self.opened.lock();
        while !*opened {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut opened, deadline).timed_out() {
                        return *opened;
                    }
                }
                None => self.cond.wait(&mut opened),
            }
        }
        true
    }
}

#[derive(Clone)]
struct Latch {
    status: LatchStatus,
    owner: TxnId,
    gate: Option<Arc<Gate>>,
}

impl Latch {
    fn free() -> Self {
        Self {
            status: LatchStatus::Free,
            owner: TxnId::INVALID,
            gate: None,
        }
    }

    fn held_by(owner: TxnId) -> Self {
        Self {
            status: LatchStatus::Held,
            owner,
            gate: Some(Arc::new(Gate::new())),
        }
    }

    /// Returns the gate to wait on if this latch blocks readers of `txn`.
    fn blocking_gate(&self, txn: TxnId) -> Option<Arc<Gate>> {
        match self.status {
            LatchStatus::Held if self.owner != txn => self.gate.clone(),
            _ => None,
        }
    }
}

/// How a shared acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedAcquire {
    /// A reader slot was taken. `waited` is true if a writer was in the way.
    Acquired {
        /// Whether the reader had to wait on a gate first.
        waited: bool,
    },
    /// The wait on a writer's gate exceeded the timeout.
    TimedOut,
}

/// Guard protecting one bucket of one key, or the map-wide size slot.
pub struct Guard {
    writer: Mutex<Option<TxnId>>,
    writer_released: Condvar,
    readers: AtomicUsize,
    latch: RwLock<Latch>,
}

impl Guard {
    /// Creates an idle guard.
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            readers: AtomicUsize::new(0),
            latch: RwLock::new(Latch::free()),
        }
    }

    /// Takes the write lock for `txn`, blocking while another transaction
    /// holds it. Re-locking by the owner is a no-op.
    pub(crate) fn lock_write(&self, txn: TxnId) {
        let mut writer = self.writer.lock();
        loop {
            let current = *writer;
            match current {
                None => {
                    *writer = Some(txn);
                    return;
                }
                Some(owner) if owner == txn => return,
                Some(_) => self.writer_released.wait(&mut writer),
            }
        }
    }

    /// Releases the write lock if `txn` owns it.
    pub(crate) fn unlock_write(&self, txn: TxnId) {
        let mut writer = self.writer.lock();
        if *writer == Some(txn) {
            *writer = None;
            self.writer_released.notify_one();
        }
    }

    /// Takes the guard as a writer: write lock, latch `Held`, and every
    /// existing reader drained.
    pub(crate) fn acquire_exclusive(&self, txn: TxnId, drain_spin_limit: u32) {
        self.lock_write(txn);
        *self.latch.write() = Latch::held_by(txn);

        let mut spins = 0;
        while self.readers.load(Ordering::SeqCst) > 0 {
            if spins < drain_spin_limit {
                spins += 1;
                std::hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
    }

    /// Releases a guard taken with [`acquire_exclusive`](Self::acquire_exclusive).
    pub(crate) fn release_exclusive(&self, txn: TxnId) {
        let previous = {
            let mut latch = self.latch.write();
            if latch.owner != txn {
                None
            } else {
                Some(std::mem::replace(&mut *latch, Latch::free()))
            }
        };
        if let Some(gate) = previous.and_then(|latch| latch.gate) {
            gate.open();
        }
        self.unlock_write(txn);
    }

    /// Takes a reader slot for `txn`.
    ///
    /// Waits on the gate of any latch held by another transaction, then
    /// retries. With a `timeout`, gives up once the total wait exceeds it.
    pub(crate) fn acquire_shared(&self, txn: TxnId, timeout: Option<Duration>) -> SharedAcquire {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut waited = false;
        loop {
            self.readers.fetch_add(1, Ordering::SeqCst);
            let gate = self.latch.read().blocking_gate(txn);
            let Some(gate) = gate else {
                return SharedAcquire::Acquired { waited };
            };

            self.readers.fetch_sub(1, Ordering::SeqCst);
            waited = true;
            if !gate.wait(deadline) {
                return SharedAcquire::TimedOut;
            }
        }
    }

    /// Gives back a reader slot.
    pub(crate) fn release_shared(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns the number of validated readers.
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Returns the latch status.
    pub fn latch_status(&self) -> LatchStatus {
        self.latch.read().status
    }

    /// Returns the transaction holding the write lock.
    pub fn writer(&self) -> Option<TxnId> {
        *self.writer.lock()
    }

    /// Returns true if nobody holds or reads the guard.
    pub fn is_idle(&self) -> bool {
        self.writer().is_none()
            && self.reader_count() == 0
            && self.latch_status() == LatchStatus::Free
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("writer", &self.writer())
            .field("readers", &self.reader_count())
            .field("latch", &self.latch_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    const T1: TxnId = TxnId::new(1);
    const T2: TxnId = TxnId::new(2);

    #[test]
    fn test_new_guard_is_idle() {
        let guard = Guard::new();
        assert!(guard.is_idle());
        assert_eq!(guard.latch_status(), LatchStatus::Free);
    }

    #[test]
    fn test_shared_does_not_block_shared() {
        let guard = Guard::new();
        assert_eq!(
            guard.acquire_shared(T1, None),
            SharedAcquire::Acquired { waited: false }
        );
        assert_eq!(
            guard.acquire_shared(T2, None),
            SharedAcquire::Acquired { waited: false }
        );
        assert_eq!(guard.reader_count(), 2);
        guard.release_shared();
        guard.release_shared();
        assert!(guard.is_idle());
    }

    #[test]
    fn test_owner_reads_through_own_latch() {
        let guard = Guard::new();
        guard.acquire_exclusive(T1, 4);
        assert_eq!(
            guard.acquire_shared(T1, Some(Duration::from_millis(1))),
            SharedAcquire::Acquired { waited: false }
        );
        guard.release_shared();
        guard.release_exclusive(T1);
        assert!(guard.is_idle());
    }

    #[test]
    fn test_exclusive_blocks_shared_until_release() {
        let guard = Arc::new(Guard::new());
        guard.acquire_exclusive(T1, 4);
        assert_eq!(guard.writer(), Some(T1));
        assert_eq!(guard.latch_status(), LatchStatus::Held);

        let reader = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || guard.acquire_shared(T2, None))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());

        guard.release_exclusive(T1);
        assert_eq!(reader.join().unwrap(), SharedAcquire::Acquired { waited: true });
        assert_eq!(guard.reader_count(), 1);
    }

    #[test]
    fn test_shared_times_out() {
        let guard = Guard::new();
        guard.acquire_exclusive(T1, 4);
        let outcome = guard.acquire_shared(T2, Some(Duration::from_millis(10)));
        assert_eq!(outcome, SharedAcquire::TimedOut);
        // The timed-out reader left no slot behind.
        assert_eq!(guard.reader_count(), 0);
    }

    #[test]
    fn test_writer_drains_readers() {
        let guard = Arc::new(Guard::new());
        guard.acquire_shared(T1, None);

        let acquired = Arc::new(AtomicBool::new(false));
        let writer = {
            let guard = Arc::clone(&guard);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                guard.acquire_exclusive(T2, 4);
                acquired.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));

        guard.release_shared();
        writer.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(guard.writer(), Some(T2));
    }

    #[test]
    fn test_writers_exclude_each_other() {
        let guard = Arc::new(Guard::new());
        guard.lock_write(T1);
        guard.lock_write(T1);

        let second = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || guard.lock_write(T2))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!second.is_finished());

        guard.unlock_write(T1);
        second.join().unwrap();
        assert_eq!(guard.writer(), Some(T2));
    }

    #[test]
    fn test_late_reader_sees_fresh_latch() {
        let guard = Guard::new();
        guard.acquire_exclusive(T1, 4);
        guard.release_exclusive(T1);
        guard.acquire_exclusive(T1, 4);
        guard.release_exclusive(T1);
        assert_eq!(
            guard.acquire_shared(T2, Some(Duration::from_millis(1))),
            SharedAcquire::Acquired { waited: false }
        );
    }
}
