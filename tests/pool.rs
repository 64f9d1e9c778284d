use crossbeam_channel;

use sockflow::pool::ThreadPool;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

//==============================================================================
// Completion Wait
//==============================================================================

/// Tests that the coordinator wait releases only after the full task count
/// has run, and that pool parallelism bounds the elapsed time from both
/// sides.
fn do_pool_wait_correctness() {
    let pool = ThreadPool::new(4, Vec::new());
    pool.start();

    let counter = Arc::new(AtomicU32::new(0));
    let t0 = Instant::now();
    for i in 0..20 {
        let counter = counter.clone();
        assert!(pool.execute(i + 1, move || {
            thread::sleep(Duration::from_millis(10));
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    assert!(pool.wait_for_completion(20));
    let elapsed = t0.elapsed();
    assert_eq!(counter.load(Ordering::SeqCst), 20);
    // 20 tasks of 10 ms across 4 workers: at least 50 ms of wall clock.
    assert!(elapsed >= Duration::from_millis(50), "finished too fast: {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(500), "finished too slowly: {:?}", elapsed);
    pool.stop();
}

#[test]
fn sockflow_pool_wait_correctness() {
    do_pool_wait_correctness();
}

//==============================================================================
// Idle Stop
//==============================================================================

/// Tests that stopping an idle pool joins every worker within bounded time.
fn do_pool_stop_idle() {
    let pool = ThreadPool::new(4, Vec::new());
    pool.start();
    assert!(pool.running());
    assert_eq!(pool.thread_count(), 4);

    let t0 = Instant::now();
    pool.stop();
    assert!(t0.elapsed() < Duration::from_secs(2));
    assert!(!pool.running());
    assert_eq!(pool.thread_count(), 0);
    assert_eq!(pool.queued_count(), 0);
}

#[test]
fn sockflow_pool_stop_idle() {
    do_pool_stop_idle();
}

//==============================================================================
// Worker Identity
//==============================================================================

/// Tests that a task can look up the id it was enqueued with and its worker
/// slot, and that a non-worker thread resolves to neither.
fn do_pool_caller_identity() {
    let pool = Arc::new(ThreadPool::new(2, Vec::new()));
    pool.start();

    let (tx, rx) = crossbeam_channel::bounded(1);
    {
        let pool = pool.clone();
        let tx = tx.clone();
        pool.clone().execute(42, move || {
            tx.send((pool.id_of_caller(), pool.handle_of_caller())).unwrap();
        });
    }
    let (task_id, slot) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(task_id, 42);
    let slot = slot.expect("task ran outside the pool");
    assert!(slot < pool.size());

    assert_eq!(pool.id_of_caller(), 0);
    assert!(pool.handle_of_caller().is_none());
    pool.stop();
}

#[test]
fn sockflow_pool_caller_identity() {
    do_pool_caller_identity();
}

//==============================================================================
// Wake
//==============================================================================

/// Tests that a blocked coordinator can be released early by an explicit
/// wake, reporting that the target was not reached.
fn do_pool_wake_releases_waiter() {
    let pool = Arc::new(ThreadPool::new(1, Vec::new()));
    pool.start();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.wait_for_completion(1000))
    };
    // No tasks ran, so the wake must release the waiter unsatisfied.
    thread::sleep(Duration::from_millis(50));
    pool.wake();
    assert!(!waiter.join().unwrap());
    pool.stop();
}

#[test]
fn sockflow_pool_wake_releases_waiter() {
    do_pool_wake_releases_waiter();
}
