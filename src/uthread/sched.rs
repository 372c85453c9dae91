//! Cooperative scheduler.
//!
//! One thread control block per thread, strict FIFO round-robin over the
//! ready queue, no priorities. The runtime is process-wide: `run` installs
//! it, drives it until the ready queue drains, and tears it down.
//!
//! TCBs are heap-pinned with `Box::leak` and passed around as raw pointers.
//!
//! # Safety
//!
//! All scheduler state lives on the single OS thread that called `run` (the
//! owner). The preemption tick is the only concurrent entry point, it runs
//! on the owner thread, and every mutator holds the tick blocked, so at any
//! instant exactly one frame is inside the scheduler. `OWNER` is published
//! after the scheduler is installed and cleared before it is torn down;
//! other OS threads observe `None` and never touch the state.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, error};

use crate::param::THREAD_STACK_SIZE;

use super::context::{self, Context, Stack};
use super::preempt;
use super::ThreadError;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(super) enum State {
    /// Executing right now; exactly one TCB is Running.
    Running,
    /// Member of the ready queue.
    Ready,
    /// Parked on exactly one semaphore's wait queue.
    Blocked,
    /// Member of the recycle list, awaiting reclamation.
    Exited,
}

pub(super) struct Tcb {
    ctx: Context,
    /// `None` for the bootstrap TCB, which runs on the host stack.
    stack: Option<Stack>,
    state: State,
    /// The thread body, taken exactly once by the entry trampoline.
    task: Option<Box<dyn FnOnce()>>,
}

impl Tcb {
    fn bootstrap() -> Self {
        Self {
            ctx: Context::new(),
            stack: None,
            state: State::Running,
            task: None,
        }
    }
}

pub(super) struct Scheduler {
    ready: VecDeque<NonNull<Tcb>>,
    recycle: VecDeque<NonNull<Tcb>>,
    current: NonNull<Tcb>,
    /// TCBs the runtime owns (bootstrap plus every spawn). Queue capacity is
    /// kept at least this large, so pushes from the tick handler never
    /// allocate.
    owned: usize,
}

struct SchedCell(std::cell::UnsafeCell<Option<Scheduler>>);
// SAFETY: see the module header; access is confined to the owner thread.
unsafe impl Sync for SchedCell {}

static SCHED: SchedCell = SchedCell(std::cell::UnsafeCell::new(None));
static ACTIVE: AtomicBool = AtomicBool::new(false);
static OWNER: AtomicUsize = AtomicUsize::new(0);

fn thread_key() -> usize {
    // SAFETY: pthread_self is always callable.
    (unsafe { libc::pthread_self() }) as usize
}

/// The scheduler, if one is installed and owned by the calling thread.
///
/// # Safety
///
/// The caller must either hold the preemption mask or touch only state owned
/// by the currently running thread; see the module header.
unsafe fn sched() -> Option<&'static mut Scheduler> {
    if OWNER.load(Ordering::Acquire) != thread_key() {
        return None;
    }
    (*SCHED.0.get()).as_mut()
}

fn reserve_queues(s: &mut Scheduler) {
    // The tick handler pushes onto these queues and must not allocate.
    let want = s.owned;
    s.ready.reserve(want.saturating_sub(s.ready.len()));
    s.recycle.reserve(want.saturating_sub(s.recycle.len()));
}

/// Hands the processor to the next ready thread. The caller is requeued per
/// its state: Running goes to the ready tail, Exited to the recycle list,
/// Blocked stays wherever its semaphore parked it. With nothing else ready
/// this is a no-op. Preemption is masked for the whole critical section and
/// unmasked when the suspended context eventually resumes.
pub(crate) fn yield_now() {
    preempt::disable();
    let _unmask = scopeguard::guard((), |()| preempt::enable());
    // SAFETY: tick masked, owner checked inside.
    let Some(s) = (unsafe { sched() }) else {
        return;
    };
    let Some(next) = s.ready.pop_front() else {
        return;
    };
    let prev = s.current;
    // SAFETY: every TCB reachable from the queues is alive until teardown.
    unsafe {
        match (*prev.as_ptr()).state {
            State::Running => {
                (*prev.as_ptr()).state = State::Ready;
                s.ready.push_back(prev);
            }
            State::Exited => s.recycle.push_back(prev),
            State::Blocked => {}
            State::Ready => unreachable!("a ready thread cannot be running"),
        }
        (*next.as_ptr()).state = State::Running;
        s.current = next;
        context::switch(&mut (*prev.as_ptr()).ctx, &(*next.as_ptr()).ctx);
    }
    // Execution returns here once `prev` is scheduled again; dropping the
    // guard unmasks the tick.
}

/// Creates a thread in the Ready state.
pub(crate) fn spawn<F: FnOnce() + 'static>(f: F) -> Result<(), ThreadError> {
    preempt::disable();
    let _unmask = scopeguard::guard((), |()| preempt::enable());
    // SAFETY: tick masked.
    let Some(s) = (unsafe { sched() }) else {
        return Err(ThreadError::RuntimeNotStarted);
    };

    let stack = Stack::new(THREAD_STACK_SIZE)?;
    let (stack_base, stack_len) = (stack.base(), stack.len());
    let tcb = Box::leak(Box::new(Tcb {
        ctx: Context::new(),
        stack: Some(stack),
        state: State::Ready,
        task: Some(Box::new(f)),
    }));
    // SAFETY: the TCB is heap-pinned by the leak above, and the stack
    // allocation lives inside it.
    unsafe { tcb.ctx.init(stack_base, stack_len, thread_entry) };

    s.owned += 1;
    reserve_queues(s);
    s.ready.push_back(NonNull::from(tcb));
    Ok(())
}

/// First frame of every spawned thread.
extern "C" fn thread_entry() {
    // A fresh context inherits the spawn-time signal mask, which has the
    // tick blocked; start taking ticks before running user code.
    preempt::enable();

    let task = {
        preempt::disable();
        let _unmask = scopeguard::guard((), |()| preempt::enable());
        // SAFETY: tick masked; only the running thread touches its own slot.
        unsafe { sched().and_then(|s| (*s.current.as_ptr()).task.take()) }
    };
    if let Some(task) = task {
        // An unwind must not cross this extern "C" frame.
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
            error!("thread panicked, exiting it");
        }
    }
    exit();
}

/// Terminates the calling thread. Its TCB moves to the recycle list and is
/// reclaimed at runtime shutdown.
pub(crate) fn exit() -> ! {
    preempt::disable();
    // SAFETY: tick masked.
    match unsafe { sched() } {
        Some(s) => unsafe { (*s.current.as_ptr()).state = State::Exited },
        None => {
            preempt::enable();
            panic!("exit() outside the thread runtime");
        }
    }
    yield_now();
    unreachable!("an exited thread was rescheduled");
}

/// Parks the calling thread. The caller must already have queued it on a
/// wait queue and must hold the preemption mask.
pub(super) fn block() {
    // SAFETY: tick masked by the caller.
    if let Some(s) = unsafe { sched() } {
        unsafe { (*s.current.as_ptr()).state = State::Blocked };
        yield_now();
    }
}

/// Moves a parked thread back to the ready tail. The caller must hold the
/// preemption mask.
///
/// # Safety
///
/// `tcb` must be a live TCB in the Blocked state, owned by this runtime.
pub(super) unsafe fn unblock(tcb: NonNull<Tcb>) {
    if let Some(s) = sched() {
        debug_assert_eq!((*tcb.as_ptr()).state, State::Blocked);
        (*tcb.as_ptr()).state = State::Ready;
        // Capacity was reserved at spawn; this never allocates.
        s.ready.push_back(tcb);
    }
}

/// The currently running TCB, if the calling thread hosts the runtime.
pub(super) fn current() -> Option<NonNull<Tcb>> {
    // SAFETY: a single pointer read of state owned by the running thread.
    unsafe { sched().map(|s| s.current) }
}

/// Hosts the runtime: spawns `f` as the first thread, drives the ready queue
/// dry under preemption, then reclaims everything.
pub(crate) fn run<F: FnOnce() + 'static>(f: F) -> Result<(), ThreadError> {
    if ACTIVE
        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        return Err(ThreadError::AlreadyRunning);
    }
    let _deactivate = scopeguard::guard((), |()| ACTIVE.store(false, Ordering::Release));

    let boot = NonNull::from(Box::leak(Box::new(Tcb::bootstrap())));
    // SAFETY: no scheduler is installed (ACTIVE was clear) and OWNER is not
    // yet published, so nothing else can observe the write.
    unsafe {
        *SCHED.0.get() = Some(Scheduler {
            ready: VecDeque::new(),
            recycle: VecDeque::new(),
            current: boot,
            owned: 1,
        });
    }
    OWNER.store(thread_key(), Ordering::Release);

    let result = spawn(f);
    if result.is_ok() {
        preempt::start();
        debug!("thread runtime started");
        loop {
            preempt::disable();
            // SAFETY: tick masked.
            let drained = unsafe { sched() }.map_or(true, |s| s.ready.is_empty());
            preempt::enable();
            if drained {
                break;
            }
            yield_now();
        }
        preempt::stop();
        debug!("thread runtime stopped");
    }

    OWNER.store(0, Ordering::Release);
    // SAFETY: the timer is disarmed and OWNER is cleared; nothing can reach
    // the scheduler anymore. Blocked TCBs still parked on semaphores are the
    // user's bug and stay leaked rather than freed under a live wait queue.
    unsafe {
        if let Some(mut s) = (*SCHED.0.get()).take() {
            while let Some(t) = s.recycle.pop_front() {
                drop(Box::from_raw(t.as_ptr()));
            }
            while let Some(t) = s.ready.pop_front() {
                drop(Box::from_raw(t.as_ptr()));
            }
        }
        drop(Box::from_raw(boot.as_ptr()));
    }
    result
}
