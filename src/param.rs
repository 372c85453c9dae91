//! System-wide constants.

/// Size of a device block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Directory-entry name field length, including the NUL terminator.
pub const FS_FILENAME_LEN: usize = 16;

/// Capacity of the root directory.
pub const FS_FILE_MAX_COUNT: usize = 128;

/// Open descriptors per volume.
pub const FS_OPEN_MAX_COUNT: usize = 32;

/// FAT end-of-chain sentinel.
pub const FAT_EOC: u16 = 0xFFFF;

/// FAT entries held by one block (16-bit entries).
pub const FAT_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 2;

/// Per-thread stack size in bytes. Generous for hosted code paths, which run
/// formatting and unwinding machinery on the thread stack.
pub const THREAD_STACK_SIZE: usize = 128 * 1024;

/// Preemption tick frequency in Hz.
pub const PREEMPT_HZ: u64 = 100;
