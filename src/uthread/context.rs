//! Machine context primitive.
//!
//! A [`Context`] is a saved execution state, a [`Stack`] is the memory a
//! thread runs on. Switching is delegated to the POSIX `ucontext` family:
//! `swapcontext` saves the callee state, restores the target state, and
//! carries the per-context signal mask along, which is what keeps switching
//! out of a signal handler sound.

use std::alloc::{alloc, dealloc, Layout};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use super::ThreadError;

/// Stack alignment required by the ABI.
const STACK_ALIGN: usize = 16;

/// An owned stack region.
pub(super) struct Stack {
    base: NonNull<u8>,
    layout: Layout,
}

impl Stack {
    pub fn new(size: usize) -> Result<Self, ThreadError> {
        let layout =
            Layout::from_size_align(size, STACK_ALIGN).map_err(|_| ThreadError::OutOfMemory)?;
        // SAFETY: the layout has a nonzero size.
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr)
            .map(|base| Self { base, layout })
            .ok_or(ThreadError::OutOfMemory)
    }

    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// A saved machine context. Zeroed until `init` prepares it or a switch
/// saves into it.
pub(super) struct Context {
    uc: libc::ucontext_t,
}

impl Context {
    pub fn new() -> Self {
        Self {
            // SAFETY: `ucontext_t` is a plain C struct; all-zero is a valid
            // (if meaningless) value, and it is fully written before use.
            uc: unsafe { MaybeUninit::zeroed().assume_init() },
        }
    }

    /// Prepares the context so that switching to it runs `entry` on the
    /// stack at `stack_base`.
    ///
    /// # Safety
    ///
    /// `stack_base .. stack_base + stack_len` must stay valid for the
    /// context's whole lifetime, and `self` must not move afterwards: the
    /// saved state holds pointers into itself.
    pub unsafe fn init(&mut self, stack_base: *mut u8, stack_len: usize, entry: extern "C" fn()) {
        let rc = libc::getcontext(&mut self.uc);
        debug_assert_eq!(rc, 0, "getcontext failed");
        self.uc.uc_stack.ss_sp = stack_base.cast();
        self.uc.uc_stack.ss_size = stack_len;
        self.uc.uc_stack.ss_flags = 0;
        self.uc.uc_link = ptr::null_mut();
        libc::makecontext(&mut self.uc, entry, 0);
    }
}

/// Saves the running state into `save` and resumes `load`. Returns when some
/// later switch resumes `save`.
///
/// # Safety
///
/// Both pointers must refer to pinned, initialized contexts (for `load`,
/// either prepared by [`Context::init`] or saved by an earlier switch).
pub(super) unsafe fn switch(save: *mut Context, load: *const Context) {
    let rc = libc::swapcontext(&mut (*save).uc, &(*load).uc);
    debug_assert_eq!(rc, 0, "swapcontext failed");
}
