//! Tests for the worker pool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use npm_mirror_core::{CancelToken, Error, WorkerId, WorkerPool};

fn pool(size: usize) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(size).with_poll_interval(Duration::from_millis(10)))
}

/// Enqueues a node that fans out into `width` children until `depth` is reached.
fn fan_out(pool: &Arc<WorkerPool>, counter: &Arc<AtomicUsize>, depth: usize, width: usize) {
    let child_pool = Arc::clone(pool);
    let counter = Arc::clone(counter);
    pool.enqueue("node", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if depth > 0 {
            for _ in 0..width {
                fan_out(&child_pool, &counter, depth - 1, width);
            }
        }
        Ok(())
    });
}

#[test]
fn test_runs_all_tasks() {
    let pool = pool(4);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter = Arc::clone(&counter);
        pool.enqueue("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    pool.run_until_idle().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 100);
    assert_eq!(pool.queued(), 0);
    pool.shutdown();
}

#[test]
fn test_recursive_fan_out_drains_completely() {
    let pool = pool(3);
    let counter = Arc::new(AtomicUsize::new(0));
    fan_out(&pool, &counter, 4, 3);

    pool.run_until_idle().unwrap();

    // 1 + 3 + 9 + 27 + 81
    assert_eq!(counter.load(Ordering::SeqCst), 121);
    pool.shutdown();
}

#[test]
fn test_does_not_return_while_task_runs() {
    let pool = pool(2);
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let child_pool = Arc::clone(&pool);
    pool.enqueue("slow", move |_| {
        thread::sleep(Duration::from_millis(150));
        let flag = Arc::clone(&flag);
        child_pool.enqueue("late child", move |_| {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        Ok(())
    });

    pool.run_until_idle().unwrap();

    assert!(done.load(Ordering::SeqCst));
    pool.shutdown();
}

#[test]
fn test_failed_tasks_do_not_kill_workers() {
    let pool = pool(1);
    let counter = Arc::new(AtomicUsize::new(0));

    pool.enqueue("error", |_| Err(Error::Pool("boom".to_string())));
    pool.enqueue("panic", |_| panic!("task panicked on purpose"));
    let c = Arc::clone(&counter);
    pool.enqueue("ok", move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    pool.run_until_idle().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(pool.failed_tasks(), 2);
    pool.shutdown();
}

#[test]
fn test_worker_identities() {
    let pool = pool(3);
    let seen = Arc::new(Mutex::new(HashSet::new()));
    for _ in 0..30 {
        let seen = Arc::clone(&seen);
        pool.enqueue("id", move |worker| {
            seen.lock().unwrap().insert(worker);
            thread::sleep(Duration::from_millis(5));
            Ok(())
        });
    }

    pool.run_until_idle().unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for worker in seen.iter() {
        match worker {
            WorkerId::Worker(n) => assert!(*n < 3),
            WorkerId::Driver => panic!("tasks never run on the driver"),
        }
    }
    pool.shutdown();
}

#[test]
fn test_start_is_idempotent() {
    let pool = pool(2);
    pool.start().unwrap();
    pool.start().unwrap();
    assert!(pool.is_running());

    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    pool.enqueue("count", move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    pool.run_until_idle().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    pool.shutdown();
}

#[test]
fn test_shutdown_is_idempotent_and_drops_late_tasks() {
    let pool = pool(2);
    pool.run_until_idle().unwrap();
    pool.shutdown();
    pool.shutdown();
    assert!(!pool.is_running());

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    pool.enqueue("late", move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    thread::sleep(Duration::from_millis(20));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_cancelled_pool_discards_queued_tasks() {
    let cancel = CancelToken::new();
    let pool = WorkerPool::with_cancel(2, cancel.clone()).with_poll_interval(Duration::from_millis(10));
    let counter = Arc::new(AtomicUsize::new(0));
    cancel.cancel();
    for _ in 0..10 {
        let counter = Arc::clone(&counter);
        pool.enqueue("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    pool.run_until_idle().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(pool.failed_tasks(), 0);
    pool.shutdown();
}
