//! Timer-driven preemption.
//!
//! A virtual interval timer raises `SIGVTALRM` at 100 Hz; the handler forces
//! a yield. Sections that mutate scheduler or semaphore state run between
//! `disable` and `enable`, which block and unblock delivery for the calling
//! thread. A tick raised while blocked stays pending and lands at `enable`.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::param::PREEMPT_HZ;

use super::sched;

/// Signal carrying the preemption tick.
const TICK_SIGNAL: libc::c_int = libc::SIGVTALRM;

static ARMED: AtomicBool = AtomicBool::new(false);

/// `pthread_t` of the thread hosting the scheduler, zero when no timer is
/// armed.
static SCHED_THREAD: AtomicUsize = AtomicUsize::new(0);

struct ActionCell(UnsafeCell<MaybeUninit<libc::sigaction>>);
// SAFETY: written only by `start` and read only by `stop`, both on the
// scheduler's thread while no timer is armed.
unsafe impl Sync for ActionCell {}

/// Disposition in place before `start`, restored by `stop`.
static OLD_ACTION: ActionCell = ActionCell(UnsafeCell::new(MaybeUninit::uninit()));

fn tick_set() -> libc::sigset_t {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initializes the set; sigaddset only needs a valid
    // set and signal number.
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), TICK_SIGNAL);
        set.assume_init()
    }
}

/// Blocks tick delivery for the calling thread.
pub(super) fn disable() {
    let set = tick_set();
    // SAFETY: adjusting the calling thread's mask has no preconditions.
    unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut()) };
}

/// Unblocks tick delivery; a pending tick fires here.
pub(super) fn enable() {
    let set = tick_set();
    // SAFETY: as for `disable`.
    unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, ptr::null_mut()) };
}

extern "C" fn tick(_sig: libc::c_int) {
    // The interval timer is process-directed, and the kernel may hand the
    // signal to any thread with it unblocked (test harnesses run several).
    // Bounce it to the scheduler's thread; pthread_kill is signal-safe.
    let target = SCHED_THREAD.load(Ordering::Acquire) as libc::pthread_t;
    if target == 0 {
        return;
    }
    // SAFETY: pthread_self is always callable; `target` names a live thread
    // because `stop` clears it before the hosting thread can exit.
    unsafe {
        if libc::pthread_self() != target {
            libc::pthread_kill(target, TICK_SIGNAL);
            return;
        }
    }
    sched::yield_now();
}

/// Installs the tick handler and arms the timer. Must run on the scheduler's
/// thread.
pub(super) fn start() {
    SCHED_THREAD.store(unsafe { libc::pthread_self() } as usize, Ordering::Release);

    let mut sa: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
    let handler: extern "C" fn(libc::c_int) = tick;
    sa.sa_sigaction = handler as usize;
    // SA_RESTART keeps device reads from failing with EINTR under the tick.
    sa.sa_flags = libc::SA_RESTART;
    // SAFETY: `sa` is fully initialized; the old action lands in OLD_ACTION,
    // which outlives the armed interval.
    unsafe {
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(TICK_SIGNAL, &sa, (*OLD_ACTION.0.get()).as_mut_ptr());
    }

    let period = libc::timeval {
        tv_sec: 0,
        tv_usec: (1_000_000 / PREEMPT_HZ) as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: period,
        it_value: period,
    };
    // SAFETY: plain timer arm.
    unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, ptr::null_mut()) };
    ARMED.store(true, Ordering::Release);
}

/// Disarms the timer, discards any pending tick, and restores the previous
/// disposition.
pub(super) fn stop() {
    if !ARMED.swap(false, Ordering::AcqRel) {
        return;
    }
    disable();

    let off = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let timer = libc::itimerval {
        it_interval: off,
        it_value: off,
    };
    // SAFETY: disarming the timer and rewriting the disposition are plain
    // libc calls; OLD_ACTION was initialized by `start` (ARMED was set).
    unsafe {
        libc::setitimer(libc::ITIMER_VIRTUAL, &timer, ptr::null_mut());
        // SIG_IGN first: a tick still pending would hit the restored
        // disposition, which may be the terminating default.
        libc::signal(TICK_SIGNAL, libc::SIG_IGN);
        libc::sigaction(TICK_SIGNAL, (*OLD_ACTION.0.get()).as_ptr(), ptr::null_mut());
    }
    SCHED_THREAD.store(0, Ordering::Release);
    enable();
}
