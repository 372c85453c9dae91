//! Thread runtime scenarios.
//!
//! The runtime is process-wide and the preemption timer is process-global,
//! so every test here runs under one lock.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use uos::uthread::{self, Semaphore, ThreadError};

static LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spin ceiling for the preemption tests; generous next to the 10 ms tick.
const SPIN_CAP: u64 = 2_000_000_000;

/// Append-only id log. Reservation and store are separate atomic steps, so a
/// preemption tick between them cannot corrupt it the way a shared `RefCell`
/// could.
struct OrderLog {
    len: AtomicUsize,
    slots: [AtomicU8; 16],
}

impl OrderLog {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            len: AtomicUsize::new(0),
            slots: Default::default(),
        })
    }

    fn push(&self, id: u8) {
        let n = self.len.fetch_add(1, Ordering::Relaxed);
        self.slots[n].store(id, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<u8> {
        (0..self.len.load(Ordering::Relaxed))
            .map(|i| self.slots[i].load(Ordering::Relaxed))
            .collect()
    }
}

#[test]
fn runtime_runs_a_single_thread_to_completion() {
    let _guard = serial();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    uthread::start(move || flag.set(true)).unwrap();
    assert!(ran.get());
}

#[test]
fn spawn_outside_the_runtime_is_refused() {
    let _guard = serial();
    assert_eq!(
        uthread::spawn(|| {}).unwrap_err(),
        ThreadError::RuntimeNotStarted
    );
    // A stray yield outside the runtime is a harmless no-op.
    uthread::yield_now();
}

#[test]
fn threads_can_spawn_more_threads() {
    let _guard = serial();
    let total = Rc::new(AtomicU32::new(0));
    let outer = total.clone();
    uthread::start(move || {
        for _ in 0..4 {
            let inner = outer.clone();
            uthread::spawn(move || {
                inner.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
    })
    .unwrap();
    assert_eq!(total.load(Ordering::Relaxed), 4);
}

#[test]
fn round_robin_is_fifo() {
    let _guard = serial();
    let order = OrderLog::new();
    let outer = order.clone();
    uthread::start(move || {
        for id in 1u8..=3 {
            let log = outer.clone();
            uthread::spawn(move || {
                for _ in 0..3 {
                    log.push(id);
                    uthread::yield_now();
                }
            })
            .unwrap();
        }
    })
    .unwrap();

    let order = order.snapshot();
    assert_eq!(order.len(), 9);
    // Threads take turns in spawn order; every lap visits each exactly once.
    for lap in order.chunks(3) {
        let mut lap = lap.to_vec();
        lap.sort_unstable();
        assert_eq!(lap, vec![1, 2, 3]);
    }
}

#[test]
fn counter_under_a_binary_semaphore_is_exact() {
    let _guard = serial();
    let counter = Rc::new(Cell::new(0u32));
    let sem = Semaphore::new(1);

    let (c, s) = (counter.clone(), sem.clone());
    uthread::start(move || {
        for _ in 0..5 {
            let (counter, sem) = (c.clone(), s.clone());
            uthread::spawn(move || {
                for _ in 0..1000 {
                    sem.down().unwrap();
                    let seen = counter.get();
                    // Hand the processor over mid-update; the semaphore must
                    // keep the increment whole anyway.
                    uthread::yield_now();
                    counter.set(seen + 1);
                    sem.up();
                }
            })
            .unwrap();
        }
    })
    .unwrap();

    assert_eq!(counter.get(), 5000);
}

#[test]
fn semaphore_wakes_waiters_in_arrival_order() {
    let _guard = serial();
    let order = OrderLog::new();
    let sem = Semaphore::new(0);

    let (log, s) = (order.clone(), sem.clone());
    uthread::start(move || {
        for id in 1u8..=3 {
            let (log, sem) = (log.clone(), s.clone());
            uthread::spawn(move || {
                sem.down().unwrap();
                log.push(id);
            })
            .unwrap();
        }
        let sem = s.clone();
        uthread::spawn(move || {
            for _ in 0..3 {
                sem.up();
            }
        })
        .unwrap();
    })
    .unwrap();

    assert_eq!(order.snapshot(), vec![1, 2, 3]);
}

#[test]
fn semaphore_down_outside_the_runtime() {
    let _guard = serial();
    // With a resource available there is nothing to park on.
    let sem = Semaphore::new(1);
    sem.down().unwrap();
    // Empty and nowhere to park: refused instead of deadlocked.
    assert_eq!(sem.down().unwrap_err(), ThreadError::RuntimeNotStarted);
}

#[test]
fn destroy_with_parked_waiters_is_refused() {
    let _guard = serial();
    let sem = Semaphore::new(0);
    let s = sem.clone();
    // The thread parks forever; the runtime drains around it.
    uthread::start(move || {
        let parked = s.clone();
        uthread::spawn(move || {
            let _ = parked.down();
        })
        .unwrap();
    })
    .unwrap();

    let (sem, err) = Semaphore::destroy(sem).unwrap_err();
    assert_eq!(err, ThreadError::SemaphoreBusy);
    drop(sem);
}

#[test]
fn preemption_reschedules_a_spinning_thread() {
    let _guard = serial();
    let released = Rc::new(AtomicBool::new(false));
    let observed = Rc::new(AtomicBool::new(false));

    let (flag, saw) = (released.clone(), observed.clone());
    uthread::start(move || {
        // The spinner never yields; only the tick can get the second thread
        // scheduled.
        let (flag2, saw2) = (flag.clone(), saw.clone());
        uthread::spawn(move || {
            for _ in 0..SPIN_CAP {
                if flag2.load(Ordering::Relaxed) {
                    saw2.store(true, Ordering::Relaxed);
                    break;
                }
                std::hint::spin_loop();
            }
        })
        .unwrap();
        let flag3 = flag.clone();
        uthread::spawn(move || flag3.store(true, Ordering::Relaxed)).unwrap();
    })
    .unwrap();

    assert!(observed.load(Ordering::Relaxed));
}

#[test]
fn preemption_interleaves_two_compute_loops() {
    let _guard = serial();
    let a = Rc::new(AtomicUsize::new(0));
    let b = Rc::new(AtomicUsize::new(0));
    let both_ran = Rc::new(AtomicU8::new(0));

    let (ra, rb, done) = (a.clone(), b.clone(), both_ran.clone());
    uthread::start(move || {
        let (mine, other, done1) = (ra.clone(), rb.clone(), done.clone());
        uthread::spawn(move || {
            for _ in 0..SPIN_CAP {
                mine.fetch_add(1, Ordering::Relaxed);
                if other.load(Ordering::Relaxed) > 0 {
                    done1.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        })
        .unwrap();
        let (mine, other, done2) = (rb.clone(), ra.clone(), done.clone());
        uthread::spawn(move || {
            for _ in 0..SPIN_CAP {
                mine.fetch_add(1, Ordering::Relaxed);
                if other.load(Ordering::Relaxed) > 0 {
                    done2.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        })
        .unwrap();
    })
    .unwrap();

    // Each loop saw the other make progress, so neither hogged the
    // processor to its cap.
    assert_eq!(both_ran.load(Ordering::Relaxed), 2);
    assert!(a.load(Ordering::Relaxed) > 0);
    assert!(b.load(Ordering::Relaxed) > 0);
}
