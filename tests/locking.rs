use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Barrier,
    },
    thread,
    time::{Duration, Instant},
};

use entity_locker::{EntityLocker, LockError};

/// Spins until `cond` holds or `limit` elapses. Returns whether it held.
fn wait_until(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        thread::yield_now();
    }
    cond()
}

#[test]
fn same_id_is_mutually_exclusive() {
    let locker = EntityLocker::new();
    let inside = AtomicUsize::new(0);
    let overlapped = AtomicBool::new(false);
    let runs = AtomicUsize::new(0);
    let start = Barrier::new(8);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                start.wait();
                for _ in 0..200 {
                    locker
                        .with_lock("account-1", || {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlapped.store(true, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            runs.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            });
        }
    });

    assert!(!overlapped.load(Ordering::SeqCst));
    assert_eq!(runs.load(Ordering::SeqCst), 1600);
    assert!(locker.is_empty());
}

#[test]
fn distinct_ids_run_in_parallel() {
    let locker = EntityLocker::new();
    let inside = AtomicUsize::new(0);

    let saw_both = thread::scope(|s| {
        let handles: Vec<_> = [1, 2]
            .iter()
            .map(|&id| {
                let locker = &locker;
                let inside = &inside;
                s.spawn(move || {
                    locker
                        .with_lock(id, || {
                            inside.fetch_add(1, Ordering::SeqCst);
                            wait_until(Duration::from_secs(5), || {
                                inside.load(Ordering::SeqCst) == 2
                            })
                        })
                        .unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .all(|both| both)
    });

    assert!(saw_both);
    assert!(locker.is_empty());
}

#[test]
fn descending_acquisition_fails_without_blocking() {
    let locker = &EntityLocker::new();
    let (held_tx, held_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    thread::scope(|s| {
        // Another thread holds 3, so blocking on it would hang this test.
        s.spawn(move || {
            locker
                .with_lock(3, || {
                    held_tx.send(()).unwrap();
                    done_rx.recv().unwrap();
                })
                .unwrap();
        });
        held_rx.recv().unwrap();

        let ran = AtomicBool::new(false);
        let start = Instant::now();
        let res = locker
            .with_lock(5, || locker.with_lock(3, || ran.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            res,
            Err(LockError::DeadlockPrevented {
                held: 5,
                requested: 3
            })
        );
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(locker.held_by_current_thread(), None);

        done_tx.send(()).unwrap();
    });
    assert!(locker.is_empty());
}

#[test]
fn reentrant_acquisition_keeps_outer_hold() {
    let locker = &EntityLocker::new();
    let depth = locker
        .with_lock(5, || {
            let depth = locker
                .with_lock(5, || locker.with_lock(5, || 3).unwrap())
                .unwrap();
            assert_eq!(locker.held_by_current_thread(), Some(5));

            // The inner releases must not have freed the outer hold.
            thread::scope(|s| {
                s.spawn(|| {
                    let err = locker.try_with_lock(5, || ()).unwrap_err();
                    assert!(matches!(err, LockError::TimedOut { id: 5, .. }));
                });
            });
            depth
        })
        .unwrap();

    assert_eq!(depth, 3);
    assert!(locker.is_empty());
    assert_eq!(locker.held_by_current_thread(), None);
}

#[test]
fn timed_acquisition_gives_up() {
    let locker = &EntityLocker::new();
    let (held_tx, held_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    thread::scope(|s| {
        s.spawn(move || {
            locker
                .with_lock(1, || {
                    held_tx.send(()).unwrap();
                    done_rx.recv().unwrap();
                })
                .unwrap();
        });
        held_rx.recv().unwrap();

        let waiter = s.spawn(move || {
            let ran = AtomicBool::new(false);
            let start = Instant::now();
            let res =
                locker.with_lock_timeout(1, Duration::from_millis(50), || {
                    ran.store(true, Ordering::SeqCst)
                });
            let elapsed = start.elapsed();
            assert_eq!(
                res,
                Err(LockError::TimedOut {
                    id: 1,
                    timeout: Duration::from_millis(50)
                })
            );
            assert!(!ran.load(Ordering::SeqCst));
            assert!(elapsed >= Duration::from_millis(50));
            assert!(elapsed < Duration::from_secs(2));
            assert_eq!(locker.held_by_current_thread(), None);
        });
        waiter.join().unwrap();

        // Only the holder's record remains.
        assert_eq!(locker.len(), 1);
        done_tx.send(()).unwrap();
    });
    assert!(locker.is_empty());
}

#[test]
fn timed_acquisition_succeeds_once_released() {
    let locker = &EntityLocker::new();
    let (held_tx, held_rx) = mpsc::channel();

    thread::scope(|s| {
        s.spawn(move || {
            locker
                .with_lock(1, || {
                    held_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(30));
                })
                .unwrap();
        });
        held_rx.recv().unwrap();

        let res = locker.with_lock_timeout(1, Duration::from_secs(5), || "ran");
        assert_eq!(res, Ok("ran"));
    });
    assert!(locker.is_empty());
}

#[test]
fn operation_error_is_returned_after_cleanup() {
    let locker = EntityLocker::new();
    let res = locker.with_lock(10, || {
        locker
            .with_lock(20, || -> Result<(), String> { Err("insufficient funds".into()) })
            .unwrap()
    });

    assert_eq!(res, Ok(Err("insufficient funds".to_string())));
    assert_eq!(locker.held_by_current_thread(), None);
    assert!(locker.is_empty());
}

#[test]
fn registry_is_empty_after_contention() {
    let locker = EntityLocker::new();

    thread::scope(|s| {
        for worker in 0..8u64 {
            let locker = &locker;
            s.spawn(move || {
                for round in 0..500u64 {
                    let id = (worker + round) % 4;
                    if round % 3 == 0 {
                        let _ = locker.with_lock_timeout(id, Duration::from_micros(50), || ());
                    } else {
                        locker.with_lock(id, thread::yield_now).unwrap();
                    }
                }
            });
        }
    });

    assert_eq!(locker.len(), 0);
}

#[test]
fn nested_ascending_threads_finish_cleanly() {
    let locker = EntityLocker::new();
    let start = Barrier::new(2);

    thread::scope(|s| {
        let t1 = s.spawn(|| {
            start.wait();
            locker
                .with_lock(10, || {
                    locker
                        .with_lock(20, || {
                            assert_eq!(locker.held_by_current_thread(), Some(20));
                            thread::sleep(Duration::from_millis(10));
                        })
                        .unwrap();
                    assert_eq!(locker.held_by_current_thread(), Some(10));
                })
                .unwrap();
        });
        let t2 = s.spawn(|| {
            start.wait();
            locker
                .with_lock(5, || thread::sleep(Duration::from_millis(10)))
                .unwrap();
            locker
                .with_lock(15, || thread::sleep(Duration::from_millis(10)))
                .unwrap();
        });
        t1.join().unwrap();
        t2.join().unwrap();
    });

    assert!(locker.is_empty());
}
