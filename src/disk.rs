//! Block-device boundary.
//!
//! A volume talks to its storage through [`BlockDevice`]: fixed 4096-byte
//! blocks, addressed by index, read and written whole. Two implementations
//! are provided. [`FileDisk`] maps blocks onto a raw image file and is what
//! real volumes use; [`MemDisk`] keeps the blocks in memory and is useful for
//! tests and tooling.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::param::BLOCK_SIZE;

/// One device block.
pub type Block = [u8; BLOCK_SIZE];

/// A device of fixed-size blocks.
///
/// `buf` must be exactly [`BLOCK_SIZE`] bytes for both `read` and `write`;
/// implementations reject other lengths with `InvalidInput`.
pub trait BlockDevice {
    /// Number of blocks on the device.
    fn count(&self) -> u16;

    /// Reads block `index` into `buf`.
    fn read(&mut self, index: u16, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `buf` to block `index`.
    fn write(&mut self, index: u16, buf: &[u8]) -> io::Result<()>;

    /// Flushes outstanding writes to stable storage.
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn check_args(index: u16, count: u16, len: usize) -> io::Result<u64> {
    if len != BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "buffer is not one block long",
        ));
    }
    if index >= count {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "block index out of range",
        ));
    }
    Ok(index as u64 * BLOCK_SIZE as u64)
}

/// Block device over a raw image file.
#[derive(Debug)]
pub struct FileDisk {
    file: File,
    blocks: u16,
}

impl FileDisk {
    /// Opens an existing image. The file length must be a whole number of
    /// blocks.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 || len / BLOCK_SIZE as u64 > u16::MAX as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "image length is not a valid block count",
            ));
        }
        let blocks = (len / BLOCK_SIZE as u64) as u16;
        Ok(Self { file, blocks })
    }

    /// Creates (or truncates) an image of `blocks` zeroed blocks.
    pub fn create<P: AsRef<Path>>(path: P, blocks: u16) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(blocks as u64 * BLOCK_SIZE as u64)?;
        Ok(Self { file, blocks })
    }
}

impl BlockDevice for FileDisk {
    fn count(&self) -> u16 {
        self.blocks
    }

    fn read(&mut self, index: u16, buf: &mut [u8]) -> io::Result<()> {
        let offset = check_args(index, self.blocks, buf.len())?;
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::fs::FileExt;
                self.file.read_exact_at(buf, offset)
            } else {
                use std::io::{Read, Seek, SeekFrom};
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.read_exact(buf)
            }
        }
    }

    fn write(&mut self, index: u16, buf: &[u8]) -> io::Result<()> {
        let offset = check_args(index, self.blocks, buf.len())?;
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::fs::FileExt;
                self.file.write_all_at(buf, offset)
            } else {
                use std::io::{Seek, SeekFrom, Write};
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.write_all(buf)
            }
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// In-memory block device.
pub struct MemDisk {
    blocks: Vec<Block>,
}

impl std::fmt::Debug for MemDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDisk")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl MemDisk {
    pub fn new(count: u16) -> Self {
        Self {
            blocks: vec![[0; BLOCK_SIZE]; count as usize],
        }
    }
}

impl BlockDevice for MemDisk {
    fn count(&self) -> u16 {
        self.blocks.len() as u16
    }

    fn read(&mut self, index: u16, buf: &mut [u8]) -> io::Result<()> {
        check_args(index, self.count(), buf.len())?;
        buf.copy_from_slice(&self.blocks[index as usize]);
        Ok(())
    }

    fn write(&mut self, index: u16, buf: &[u8]) -> io::Result<()> {
        check_args(index, self.count(), buf.len())?;
        self.blocks[index as usize].copy_from_slice(buf);
        Ok(())
    }
}
