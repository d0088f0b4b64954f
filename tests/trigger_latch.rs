//! Trigger latch under contention: many waiters, several openers.

use jfstream::{PipelineError, TriggerLatch};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn every_waiter_sees_the_first_frame() {
    let latch = Arc::new(TriggerLatch::new());
    let cancel = Arc::new(AtomicBool::new(false));

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let latch = latch.clone();
            let cancel = cancel.clone();
            thread::spawn(move || latch.wait(&cancel, Some(Duration::from_secs(10))))
        })
        .collect();

    let barrier = Arc::new(Barrier::new(4));
    let openers: Vec<_> = (0..4u64)
        .map(|i| {
            let latch = latch.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                latch.open(100 + i)
            })
        })
        .collect();

    let opened: Vec<u64> = openers.into_iter().map(|h| h.join().unwrap()).collect();
    let winner = latch.get().unwrap();
    assert!((100..104).contains(&winner));
    assert!(opened.iter().all(|&frame| frame == winner));

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap().unwrap(), winner);
    }
}

#[test]
fn late_waiter_returns_immediately() {
    let latch = TriggerLatch::new();
    latch.open(5);
    assert_eq!(latch.wait(&AtomicBool::new(true), Some(Duration::ZERO)).unwrap(), 5);
}

#[test]
fn unopened_latch_times_out_every_waiter() {
    let latch = Arc::new(TriggerLatch::new());
    let cancel = Arc::new(AtomicBool::new(false));
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let latch = latch.clone();
            let cancel = cancel.clone();
            thread::spawn(move || latch.wait(&cancel, Some(Duration::from_millis(30))))
        })
        .collect();

    for waiter in waiters {
        assert!(matches!(
            waiter.join().unwrap(),
            Err(PipelineError::TriggerTimeout { .. })
        ));
    }
    assert_eq!(latch.get(), None);
}
