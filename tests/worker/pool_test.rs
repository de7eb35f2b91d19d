/*!
 * Worker Pool Tests
 * Slot bounds and limits across the whole valid range
 */

use lifecycle_kernel::{LifecycleError, Worker, WorkerPool};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #[test]
    fn prop_pool_len_matches_limit(limit in 0usize..=50) {
        let pool = WorkerPool::new(limit).unwrap();
        prop_assert_eq!(pool.len(), limit);
        prop_assert_eq!(pool.worker_limit(), limit);
        prop_assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn prop_pool_rejects_large_limits(limit in 51usize..1000) {
        prop_assert!(WorkerPool::new(limit).is_err());
    }

    #[test]
    fn prop_slot_bounds(limit in 1usize..=50, slot in 0usize..100) {
        let pool = WorkerPool::new(limit).unwrap();
        let added = pool.add_worker(slot, Arc::new(Worker::new(slot)));

        if slot < limit {
            prop_assert!(added.is_ok());
            prop_assert_eq!(pool.get_worker(slot).unwrap().id(), slot);
            let expected_free = (0..limit).find(|s| *s != slot);
            prop_assert_eq!(pool.next_free_slot(), expected_free);
        } else {
            let out_of_range = matches!(added, Err(LifecycleError::OutOfRange { .. }));
            prop_assert!(out_of_range);
            let lookup = matches!(pool.get_worker(slot), Err(LifecycleError::OutOfRange { .. }));
            prop_assert!(lookup);
        }
    }
}

#[test]
fn test_fill_every_slot() {
    let pool = WorkerPool::new(5).unwrap();
    while let Some(slot) = pool.next_free_slot() {
        pool.add_worker(slot, Arc::new(Worker::new(slot))).unwrap();
    }
    assert_eq!(pool.worker_count(), 5);
    assert_eq!(pool.statuses().iter().flatten().count(), 5);
}

#[test]
fn test_stats_serialize() {
    let pool = WorkerPool::new(3).unwrap();
    pool.add_worker(1, Arc::new(Worker::new(1))).unwrap();

    let json = serde_json::to_value(pool.stats()).unwrap();
    assert_eq!(json["limit"], 3);
    assert_eq!(json["occupied"], 1);
    assert_eq!(json["running"], 0);
}
