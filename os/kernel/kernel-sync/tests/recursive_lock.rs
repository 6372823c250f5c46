use core::num::NonZeroU64;
use kernel_sync::RecursiveLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn token(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).unwrap()
}

#[test]
fn reentry_by_owner_nests() {
    let lock = RecursiveLock::new();
    let me = token(1);

    lock.lock(me);
    lock.lock(me);
    assert!(lock.try_lock(me));
    assert_eq!(lock.depth(), 3);
    assert!(lock.is_owned_by(me));

    unsafe {
        assert!(!lock.unlock(me));
        assert!(!lock.unlock(me));
        assert!(lock.unlock(me), "last unlock releases");
    }
    assert!(!lock.is_locked());
    assert_eq!(lock.depth(), 0);
}

#[test]
fn other_owner_is_excluded() {
    let lock = RecursiveLock::new();
    lock.lock(token(1));
    assert!(!lock.try_lock(token(2)));
    assert!(!lock.is_owned_by(token(2)));
    unsafe { lock.unlock(token(1)) };
    assert!(lock.try_lock(token(2)));
    unsafe { lock.unlock(token(2)) };
}

#[test]
fn contended_nested_sections_are_exclusive() {
    let threads = 6;
    let iters = 2_000;

    let lock = Arc::new(RecursiveLock::new());
    let in_cs = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let total = Arc::clone(&total);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let me = token(i as u64 + 1);
                start.wait();
                for _ in 0..iters {
                    lock.lock(me);
                    assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0, "mutual exclusion violated");
                    lock.lock(me);
                    total.fetch_add(1, Ordering::Relaxed);
                    unsafe { assert!(!lock.unlock(me)) };
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                    unsafe { assert!(lock.unlock(me)) };
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), threads * iters);
    assert!(!lock.is_locked());
}
