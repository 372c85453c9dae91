//! Counting semaphores.
//!
//! A semaphore is a non-negative count plus a FIFO queue of parked threads,
//! so wake order matches arrival order. `down` uses wake-and-recheck
//! semantics: a woken waiter re-enters the preemption mask and re-tests the
//! count before taking it, which makes racing wakers harmless.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;

use super::sched::{self, Tcb};
use super::{preempt, ThreadError};

pub struct Semaphore {
    count: Cell<usize>,
    waiters: RefCell<VecDeque<NonNull<Tcb>>>,
}

impl Semaphore {
    /// A semaphore holding `count` resources. Threads share it by cloning
    /// the `Rc` into their closures.
    pub fn new(count: usize) -> Rc<Self> {
        Rc::new(Self {
            count: Cell::new(count),
            waiters: RefCell::new(VecDeque::new()),
        })
    }

    /// Takes one resource, parking the calling thread while none is
    /// available. Fails with `RuntimeNotStarted` when it would have to park
    /// outside the runtime.
    pub fn down(&self) -> Result<(), ThreadError> {
        preempt::disable();
        let _unmask = scopeguard::guard((), |()| preempt::enable());
        loop {
            if self.count.get() > 0 {
                break;
            }
            let cur = sched::current().ok_or(ThreadError::RuntimeNotStarted)?;
            self.waiters.borrow_mut().push_back(cur);
            // Parking yields; the switch back unmasks the tick, so the mask
            // must be re-entered before the count is re-tested.
            sched::block();
            preempt::disable();
        }
        self.count.set(self.count.get() - 1);
        Ok(())
    }

    /// Returns one resource, waking the longest-parked waiter if any.
    pub fn up(&self) {
        preempt::disable();
        let _unmask = scopeguard::guard((), |()| preempt::enable());
        let woken = self.waiters.borrow_mut().pop_front();
        if let Some(tcb) = woken {
            // SAFETY: the queue only ever holds threads parked by `down`,
            // and the mask is held.
            unsafe { sched::unblock(tcb) };
        }
        self.count.set(self.count.get() + 1);
    }

    /// Releases the semaphore. Refused while threads are parked on it; the
    /// semaphore is handed back so the caller still owns it.
    pub fn destroy(this: Rc<Self>) -> Result<(), (Rc<Self>, ThreadError)> {
        if !this.waiters.borrow().is_empty() {
            return Err((this, ThreadError::SemaphoreBusy));
        }
        Ok(())
    }
}
