//! Cooperative user-space threads.
//!
//! Many threads multiplex one OS thread. [`start`] hosts the runtime: it
//! spawns the first thread, arms a 100 Hz preemption tick, and returns once
//! every thread has run to completion. Inside the runtime, [`spawn`] creates
//! more threads, [`yield_now`] hands the processor over voluntarily, and
//! [`Semaphore`] coordinates. Scheduling is strict FIFO round-robin; the
//! tick only injects yields, it never adds parallelism.
//!
//! ```no_run
//! use uos::uthread;
//!
//! uthread::start(|| {
//!     for _ in 0..3 {
//!         uthread::spawn(|| println!("hello")).unwrap();
//!     }
//! })
//! .unwrap();
//! ```

use thiserror::Error;

mod context;
mod preempt;
mod sched;
mod sem;

pub use sem::Semaphore;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// A stack could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// The call needs a hosted runtime on the calling thread.
    #[error("thread runtime not started")]
    RuntimeNotStarted,
    /// Another runtime is already hosted in this process.
    #[error("thread runtime already running")]
    AlreadyRunning,
    /// The semaphore still has parked waiters.
    #[error("semaphore has waiters")]
    SemaphoreBusy,
}

/// Hosts the thread runtime on the calling OS thread. `f` runs as the first
/// thread; `start` returns once the ready queue is empty and everything has
/// been reclaimed.
pub fn start<F: FnOnce() + 'static>(f: F) -> Result<(), ThreadError> {
    sched::run(f)
}

/// Creates a new thread, scheduled after everything already ready.
pub fn spawn<F: FnOnce() + 'static>(f: F) -> Result<(), ThreadError> {
    sched::spawn(f)
}

/// Hands the processor to the next ready thread; returns when the caller is
/// scheduled again.
pub fn yield_now() {
    sched::yield_now()
}

/// Terminates the calling thread. Returning from the thread body does this
/// implicitly.
pub fn exit() -> ! {
    sched::exit()
}
