//! Randomized concurrent stress test for the composite pool.
//!
//! Several workers stride over logical frames exactly like the pipeline
//! does, while a single reclaimer thread releases slots after a random
//! delay. The pool must never exceed its capacity, every frame must be
//! released exactly once, and each slot must carry its frames in order.

use jf_pool::CompositePool;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn run_stress(seed: u64, capacity: usize, workers: u64, frames: u64) {
    let owned = CompositePool::new(capacity, 64).unwrap();
    let pool: &CompositePool = &owned;
    let (tx, rx) = mpsc::channel::<(usize, u64)>();

    let released = thread::scope(|s| {
        let reclaimer = s.spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut released = Vec::new();
            let mut last_on_slot = vec![None::<u64>; capacity];
            for _ in 0..frames {
                let (buffer_id, frame) = rx.recv().unwrap();
                if let Some(last) = last_on_slot[buffer_id] {
                    assert_eq!(frame, last + capacity as u64, "slot {buffer_id} skipped a frame");
                }
                last_on_slot[buffer_id] = Some(frame);
                assert!(pool.occupied() <= pool.capacity());
                thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
                let holder = pool.release(buffer_id).unwrap();
                assert_eq!(holder, frame, "slot released for the wrong frame");
                released.push(holder);
            }
            released
        });

        for worker in 0..workers {
            let tx = tx.clone();
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed ^ (worker + 1));
                let mut frame = worker;
                while frame < frames {
                    let buffer_id = pool.buffer_id(frame);
                    let mut lease = pool.acquire(buffer_id, frame).unwrap();
                    lease.as_i32_mut().fill(frame as i32);
                    if rng.gen_bool(0.3) {
                        thread::yield_now();
                    }
                    assert!(lease.as_i32_mut().iter().all(|&p| p == frame as i32));
                    let posted = lease.into_in_flight(64).unwrap();
                    tx.send((posted.buffer_id, posted.frame)).unwrap();
                    frame += workers;
                }
            });
        }
        drop(tx);

        reclaimer.join().unwrap()
    });

    let unique: HashSet<u64> = released.iter().copied().collect();
    assert_eq!(unique.len() as u64, frames, "a frame was lost or duplicated");
    assert_eq!(pool.total_acquires(), frames);
    assert_eq!(pool.total_releases(), frames);
    assert_eq!(pool.occupied(), 0);
    assert!(pool.peak_occupied() <= capacity);
}

#[test]
fn bound_holds_with_coprime_worker_count() {
    run_stress(0x5eed, 4, 3, 300);
}

#[test]
fn bound_holds_with_more_workers_than_slots() {
    run_stress(42, 2, 5, 200);
}

#[test]
fn bound_holds_across_seeds() {
    for seed in 0..4 {
        run_stress(seed, 3, 4, 120);
    }
}
