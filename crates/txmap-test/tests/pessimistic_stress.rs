//! Concurrency stress tests for the pessimistic map.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;
use txmap_test::utils::{init_tracing, run_concurrently, within, STRESS_DEADLINE};
use txmap_test::workload::{enqueue, Workload, WorkloadConfig};
use txmap_txn::{
    Bucket, EngineConfig, PessimisticMap, RegistryPolicy, TransactionError, TransactionState,
};

const THREADS: usize = 8;

fn assert_all_guards_idle(map: &PessimisticMap<u32, u64>, key_space: u32) {
    let registry = map.registry();
    for key in 0..key_space {
        let guards = registry.guards(&key);
        for bucket in [Bucket::Modify, Bucket::Get, Bucket::Contains] {
            assert!(
                guards.bucket(bucket).is_idle(),
                "{} guard of key {} left held: {:?}",
                bucket,
                key,
                guards.bucket(bucket)
            );
        }
    }
    assert!(registry.size_guard().is_idle());
}

#[test]
fn test_random_workload_never_deadlocks() {
    init_tracing();
    let key_space = 8;
    let per_thread = 300;
    let map: PessimisticMap<u32, u64> = PessimisticMap::new();

    let worker_map = map.clone();
    let finished = within(STRESS_DEADLINE, move || {
        run_concurrently(THREADS, move |index| {
            let config = WorkloadConfig::default().with_key_space(key_space);
            let mut workload = Workload::new(index as u64, config);
            for _ in 0..per_thread {
                let plan = workload.next_plan();
                let mut tx = worker_map.begin_tx();
                let cells = enqueue(&mut tx, &plan).unwrap();
                tx.commit().unwrap();
                assert!(cells.iter().all(|cell| cell.outcome().is_some()));
            }
        })
    });
    assert!(finished.is_some(), "stress run did not finish; likely deadlock");

    assert_eq!(map.stats().committed_count(), (THREADS * per_thread) as u64);
    assert_eq!(map.stats().aborted_count(), 0);
    assert_all_guards_idle(&map, key_space);
    info!(entries = map.len(), "random workload finished");
}

#[test]
fn test_reverse_order_writers_do_not_deadlock() {
    let map: PessimisticMap<u32, u64> = PessimisticMap::new();
    let worker_map = map.clone();
    let finished = within(STRESS_DEADLINE, move || {
        run_concurrently(THREADS, move |index| {
            for round in 0..500u64 {
                let mut tx = worker_map.begin_tx();
                // Half the threads touch keys ascending, half descending.
                if index % 2 == 0 {
                    for key in 0..4 {
                        tx.put(key, round).unwrap();
                    }
                } else {
                    for key in (0..4).rev() {
                        tx.put(key, round).unwrap();
                    }
                }
                tx.commit().unwrap();
            }
        })
    });
    assert!(finished.is_some(), "crossed writers deadlocked");
    assert_eq!(map.len(), 4);
    assert_all_guards_idle(&map, 4);
}

#[test]
fn test_group_writes_are_atomic() {
    const GROUP: u32 = 4;
    let map: PessimisticMap<u32, u64> = PessimisticMap::new();
    let worker_map = map.clone();

    run_concurrently(THREADS, move |index| {
        for round in 0..400u64 {
            let mut tx = worker_map.begin_tx();
            if index % 2 == 0 {
                let value = (index as u64) << 32 | round;
                for key in 0..GROUP {
                    tx.put(key, value).unwrap();
                }
                tx.commit().unwrap();
            } else {
                let cells: Vec<_> = (0..GROUP).map(|key| tx.get(key).unwrap()).collect();
                tx.commit().unwrap();
                let first = cells[0].get().unwrap();
                for cell in &cells[1..] {
                    assert_eq!(cell.get().unwrap(), first, "reader saw a torn group");
                }
            }
        }
    });

    let mut tx = map.begin_tx();
    let cells: Vec<_> = (0..GROUP).map(|key| tx.get(key).unwrap()).collect();
    tx.commit().unwrap();
    let first = cells[0].get().unwrap();
    assert!(first.is_some());
    assert!(cells.iter().all(|cell| cell.get().unwrap() == first));
}

#[test]
fn test_hot_key_writers_are_serialized() {
    const HOT: u32 = 0;
    let rounds = 300u64;
    let map: PessimisticMap<u32, u64> = PessimisticMap::new();
    let observed = Arc::new(Mutex::new(Vec::new()));

    let worker_map = map.clone();
    let worker_observed = Arc::clone(&observed);
    let finished = within(STRESS_DEADLINE, move || {
        run_concurrently(THREADS, move |index| {
            let mut seen = Vec::with_capacity(rounds as usize);
            for round in 0..rounds {
                let value = (index as u64) << 32 | round;
                let mut tx = worker_map.begin_tx();
                let before = tx.get(HOT).unwrap();
                let previous = tx.put(HOT, value).unwrap();
                tx.commit().unwrap();
                assert_eq!(before.get(), previous.get());
                seen.push((previous.get().unwrap(), value));
            }
            worker_observed.lock().unwrap().extend(seen);
        })
    });
    assert!(finished.is_some(), "hot key writers stalled");

    // Every committed write replaced a distinct predecessor, so the writes
    // form one chain: no two writers ever held the key at the same time.
    let observed = observed.lock().unwrap();
    let total = THREADS * rounds as usize;
    assert_eq!(observed.len(), total);
    let written: HashSet<u64> = observed.iter().map(|&(_, value)| value).collect();
    let predecessors: HashSet<Option<u64>> = observed.iter().map(|&(prev, _)| prev).collect();
    assert_eq!(predecessors.len(), total, "two writers replaced the same value");
    assert!(predecessors.contains(&None));
    assert!(predecessors.iter().flatten().all(|prev| written.contains(prev)));

    let mut tx = map.begin_tx();
    let last = tx.get(HOT).unwrap();
    tx.commit().unwrap();
    let last = last.get().unwrap().unwrap();
    assert!(!predecessors.contains(&Some(last)), "final value was overwritten");
    assert_all_guards_idle(&map, 1);
}

#[test]
fn test_readers_never_see_a_write_in_progress() {
    const HOT: u32 = 1;
    let map: PessimisticMap<u32, u64> = PessimisticMap::new();
    let torn = Arc::new(AtomicU64::new(0));

    let worker_map = map.clone();
    let worker_torn = Arc::clone(&torn);
    let finished = within(STRESS_DEADLINE, move || {
        run_concurrently(THREADS, move |index| {
            for round in 0..400u64 {
                let mut tx = worker_map.begin_tx();
                if index % 2 == 0 {
                    if round % 2 == 0 {
                        tx.put(HOT, round).unwrap();
                    } else {
                        tx.remove(HOT).unwrap();
                    }
                    tx.commit().unwrap();
                } else {
                    // Get and Contains sit behind separate guards; both must
                    // be held across the whole read for the two to agree.
                    let value = tx.get(HOT).unwrap();
                    let present = tx.contains_key(HOT).unwrap();
                    tx.commit().unwrap();
                    if value.get().unwrap().is_some() != present.get().unwrap() {
                        worker_torn.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        })
    });
    assert!(finished.is_some(), "readers and writers stalled");
    assert_eq!(torn.load(Ordering::SeqCst), 0, "a reader saw a half-applied write");
    assert_eq!(map.stats().committed_count(), (THREADS * 400) as u64);
    assert_all_guards_idle(&map, 2);
}

#[test]
fn test_size_never_sees_half_a_pair() {
    let map: PessimisticMap<u32, u64> = PessimisticMap::new();
    let worker_map = map.clone();

    run_concurrently(THREADS, move |index| {
        for round in 0..400u32 {
            let mut tx = worker_map.begin_tx();
            if index % 3 == 0 {
                let size = tx.size().unwrap();
                let contains = tx.contains_key(0).unwrap();
                tx.commit().unwrap();
                assert_eq!(size.get().unwrap() % 2, 0, "size saw half a pair");
                let _ = contains.get().unwrap();
            } else {
                let pair = (round % 4) * 2;
                if (round + index as u32) % 2 == 0 {
                    tx.put(pair, 1).unwrap();
                    tx.put(pair + 1, 1).unwrap();
                } else {
                    tx.remove(pair).unwrap();
                    tx.remove(pair + 1).unwrap();
                }
                tx.commit().unwrap();
            }
        }
    });

    assert_eq!(map.len() % 2, 0);
    assert_all_guards_idle(&map, 8);
}

#[test]
fn test_read_timeouts_abort_cleanly() {
    init_tracing();
    let config = EngineConfig::default()
        .with_latch_wait_timeout(Duration::from_micros(50))
        .with_registry_policy(RegistryPolicy::EvictIdle);
    let map: PessimisticMap<u32, u64> = PessimisticMap::with_config(config).unwrap();
    let aborts = Arc::new(AtomicU64::new(0));

    let worker_map = map.clone();
    let worker_aborts = Arc::clone(&aborts);
    run_concurrently(THREADS, move |index| {
        let config = WorkloadConfig::default()
            .with_key_space(4)
            .with_read_ratio(0.6);
        let mut workload = Workload::new(100 + index as u64, config);
        for _ in 0..300 {
            let plan = workload.next_plan();
            let mut tx = worker_map.begin_tx();
            let cells = enqueue(&mut tx, &plan).unwrap();
            match tx.commit() {
                Ok(()) => assert!(cells.iter().all(|cell| cell.outcome().is_some())),
                Err(TransactionError::Aborted { txn_id, .. }) => {
                    assert_eq!(txn_id, tx.id());
                    assert_eq!(tx.state(), TransactionState::Aborted);
                    assert!(cells.iter().all(|cell| cell.outcome().is_none()));
                    worker_aborts.fetch_add(1, Ordering::SeqCst);
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    });

    let stats = map.stats();
    assert_eq!(stats.aborted_count(), aborts.load(Ordering::SeqCst));
    assert_eq!(
        stats.committed_count() + stats.aborted_count(),
        (THREADS * 300) as u64
    );
    assert!(map.registry().size_guard().is_idle());
    info!(aborts = stats.aborted_count(), "timeout run finished");
}

#[test]
fn test_serial_replay_matches_model() {
    let map: PessimisticMap<u32, u64> = PessimisticMap::new();
    let mut model = HashMap::new();
    let mut workload = Workload::new(42, WorkloadConfig::default());

    for _ in 0..500 {
        let plan = workload.next_plan();
        let mut tx = map.begin_tx();
        let cells = enqueue(&mut tx, &plan).unwrap();
        tx.commit().unwrap();
        for (op, cell) in plan.iter().zip(&cells) {
            assert_eq!(cell.outcome(), Some(op.apply(&mut model)), "{op:?}");
        }
    }
    assert_eq!(map.len(), model.len());
}
