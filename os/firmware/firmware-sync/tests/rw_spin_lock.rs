use firmware_sync::RwSpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn readers_share() {
    let l = RwSpinLock::new(7u32);
    let a = l.read();
    let b = l.read();
    assert_eq!(*a + *b, 14);
    assert_eq!(l.readers(), 2);
    assert!(l.try_write().is_none());
    drop((a, b));
    assert_eq!(l.readers(), 0);
    assert!(l.try_write().is_some());
}

#[test]
fn writer_excludes_readers() {
    let l = RwSpinLock::new(Vec::<u8>::new());
    let mut w = l.write();
    w.push(1);
    assert!(l.try_read().is_none());
    assert!(l.try_write().is_none());
    drop(w);
    assert_eq!(l.read().as_slice(), &[1]);
}

#[test]
fn get_mut_bypasses_locking() {
    let mut l = RwSpinLock::new(1u64);
    *l.get_mut() = 5;
    assert_eq!(l.into_inner(), 5);
}

#[test]
fn writers_never_overlap_readers() {
    let threads = 6;
    let iters = 2_000;

    let lock = Arc::new(RwSpinLock::new(0usize));
    let writers_in = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let lock = Arc::clone(&lock);
            let writers_in = Arc::clone(&writers_in);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    if t % 2 == 0 {
                        let mut g = lock.write();
                        assert_eq!(writers_in.fetch_add(1, Ordering::SeqCst), 0);
                        *g += 1;
                        writers_in.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        let g = lock.read();
                        assert_eq!(writers_in.load(Ordering::SeqCst), 0);
                        let _ = *g;
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.read(), (threads / 2) * iters);
}
