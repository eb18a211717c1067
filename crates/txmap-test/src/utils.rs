use std::panic;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Upper bound for a stress run. Hitting it means the run is stuck.
pub const STRESS_DEADLINE: Duration = Duration::from_secs(60);

/// Installs a test-writer subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runs `f` on its own thread and waits at most `limit` for it.
///
/// Returns `None` if the deadline passed first; the thread is left behind.
/// A panic inside `f` is re-raised on the caller.
pub fn within<T, F>(limit: Duration, f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let out = f();
        let _ = done_tx.send(());
        out
    });
    match done_rx.recv_timeout(limit) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => match handle.join() {
            Ok(out) => Some(out),
            Err(payload) => panic::resume_unwind(payload),
        },
        Err(RecvTimeoutError::Timeout) => None,
    }
}

/// Starts `threads` workers behind a barrier and joins them all.
///
/// Each worker gets its index. The first worker panic is re-raised.
pub fn run_concurrently<F>(threads: usize, work: F)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|index| {
            let work = Arc::clone(&work);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                work(index);
            })
        })
        .collect();
    for handle in handles {
        if let Err(payload) = handle.join() {
            panic::resume_unwind(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_within_returns_result() {
        assert_eq!(within(Duration::from_secs(5), || 7), Some(7));
    }

    #[test]
    fn test_within_times_out() {
        let out = within(Duration::from_millis(10), || {
            thread::sleep(Duration::from_millis(500));
        });
        assert!(out.is_none());
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_within_reraises_panic() {
        within(Duration::from_secs(5), || panic!("boom"));
    }

    #[test]
    fn test_run_concurrently_runs_every_worker() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        run_concurrently(4, move |index| {
            counter.fetch_add(index + 1, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1 + 2 + 3 + 4);
    }
}
