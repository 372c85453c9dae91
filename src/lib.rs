//! Userspace OS components.
//!
//! Two independent subsystems share this crate:
//!
//! + [`fs`], a FAT-style file system over a fixed-size block-device image:
//!   superblock, linear FAT, single-level root directory, and positioned
//!   read/write with automatic extension.
//! + [`uthread`], a cooperative user-space thread runtime: FIFO ready
//!   queue, explicit yield, counting semaphores, and preemption driven by a
//!   virtual interval timer.
//!
//! [`disk`] carries the block-device boundary the file system builds on, and
//! [`param`] the system-wide constants.

pub mod disk;
pub mod fs;
pub mod param;

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
        pub mod uthread;
    } else {
        compile_error!("the thread runtime needs glibc ucontext and interval timers");
    }
}

pub use disk::{BlockDevice, FileDisk, MemDisk};
pub use fs::{format, FsError, Volume};
