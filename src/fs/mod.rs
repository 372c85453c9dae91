//! FAT-style volume over a block device.
//!
//! Four layers, leaves first:
//!   + Layout: the on-disk superblock and directory entry formats.
//!   + FAT: allocation and traversal of per-file block chains.
//!   + Directory: a single block of 128 fixed-size entries.
//!   + Descriptors: a 32-slot open-file table of (entry, offset) pairs.
//!
//! [`Volume`] owns the device and the in-memory copies of all metadata from
//! `mount` to `unmount`. Mutations become durable at `unmount`, which writes
//! the superblock, the FAT, and the root directory back in that order.

use std::io;

use arrayvec::ArrayString;
use itertools::izip;
use log::{debug, info, warn};
use thiserror::Error;
use zerocopy::{AsBytes, FromBytes};

use crate::disk::{Block, BlockDevice};
use crate::param::{BLOCK_SIZE, FAT_EOC, FS_FILENAME_LEN};

mod dir;
mod fat;
mod fd;
mod layout;

use dir::RootDir;
use fat::Fat;
use fd::FdTable;
use layout::Superblock;

/// An open-file descriptor, an index into the volume's descriptor table.
pub type Fd = usize;

#[derive(Debug, Error)]
pub enum FsError {
    /// The image has no valid superblock or does not match the device.
    #[error("not a valid volume image")]
    BadImage,
    /// Metadata on a mounted volume contradicts itself (broken chain, size
    /// past the end of its chain).
    #[error("volume metadata is corrupted")]
    Corrupted,
    #[error("device error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid file name")]
    InvalidName,
    #[error("file already exists")]
    Exists,
    #[error("root directory is full")]
    DirectoryFull,
    #[error("no such file")]
    NotFound,
    #[error("too many open files")]
    TooManyOpen,
    #[error("bad file descriptor")]
    BadFd,
    /// The file is held open by a descriptor.
    #[error("file is open")]
    Busy,
    /// Descriptors are still open on the volume.
    #[error("descriptors still open")]
    OpenFiles,
    #[error("seek past end of file")]
    InvalidSeek,
}

/// Volume totals, as reported by [`Volume::info`].
#[derive(Copy, Clone, Debug)]
pub struct VolumeInfo {
    pub total_blocks: u16,
    pub fat_blocks: u8,
    pub root_dir_block: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub fat_free: usize,
    pub dir_free: usize,
}

impl std::fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FS Info:")?;
        writeln!(f, "total_blk_count={}", self.total_blocks)?;
        writeln!(f, "fat_blk_count={}", self.fat_blocks)?;
        writeln!(f, "rdir_blk={}", self.root_dir_block)?;
        writeln!(f, "data_blk={}", self.data_start)?;
        writeln!(f, "data_blk_count={}", self.data_blocks)?;
        writeln!(f, "fat_free_ratio={}/{}", self.fat_free, self.data_blocks)?;
        write!(
            f,
            "rdir_free_ratio={}/{}",
            self.dir_free,
            crate::param::FS_FILE_MAX_COUNT
        )
    }
}

/// One line of a directory listing.
#[derive(Copy, Clone, Debug)]
pub struct FileInfo {
    pub name: ArrayString<FS_FILENAME_LEN>,
    pub size: u32,
    /// First data block of the file, `FAT_EOC` when empty.
    pub first_block: u16,
}

impl std::fmt::Display for FileInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "file: {}, size: {}, data_blk: {}",
            self.name, self.size, self.first_block
        )
    }
}

/// Writes an empty volume onto `dev`: blank superblock, all-free FAT, empty
/// root directory. The geometry is derived from the device size; devices too
/// small to hold any data block are rejected as `BadImage`.
pub fn format<D: BlockDevice>(dev: &mut D) -> Result<(), FsError> {
    let geo = layout::fit(dev.count()).ok_or(FsError::BadImage)?;
    let sb = Superblock::for_geometry(geo);

    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(sb.as_bytes());
    dev.write(0, &block)?;

    let zero = [0u8; BLOCK_SIZE];
    for index in 1..=geo.fat_blocks as u16 {
        dev.write(index, &zero)?;
    }
    dev.write(1 + geo.fat_blocks as u16, &zero)?;
    dev.sync()?;
    info!(
        "formatted volume: {} blocks, {} data blocks",
        geo.total, geo.data_blocks
    );
    Ok(())
}

/// A mounted volume. Owns the device plus the in-memory superblock, FAT,
/// root directory, and open-file table.
pub struct Volume<D: BlockDevice> {
    dev: D,
    sb: Box<Superblock>,
    fat: Fat,
    dir: RootDir,
    fds: FdTable,
}

impl<D: BlockDevice> std::fmt::Debug for Volume<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume").field("info", &self.info()).finish()
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Mounts the volume found on `dev`, taking ownership of the device.
    pub fn mount(mut dev: D) -> Result<Self, FsError> {
        let mut block = [0u8; BLOCK_SIZE];
        dev.read(0, &mut block)?;
        let sb = Superblock::read_from(&block[..]).ok_or(FsError::BadImage)?;
        if !sb.is_consistent(dev.count()) {
            return Err(FsError::BadImage);
        }

        let mut raw = Vec::with_capacity(sb.fat_blocks as usize * BLOCK_SIZE);
        for index in 1..=sb.fat_blocks as u16 {
            dev.read(index, &mut block)?;
            raw.extend_from_slice(&block);
        }
        let fat = Fat::parse(&raw, sb.data_blocks.get() as usize);

        dev.read(sb.root_dir_block.get(), &mut block)?;
        let dir = RootDir::from_block(&block);

        info!(
            "mounted volume: {} blocks, {}/{} data blocks free",
            sb.total_blocks.get(),
            fat.free_count(),
            fat.len()
        );
        Ok(Self {
            dev,
            sb: Box::new(sb),
            fat,
            dir,
            fds: FdTable::new(),
        })
    }

    /// Writes all metadata back, syncs, and releases the device. Refused
    /// while any descriptor is open; on any failure the still-mounted volume
    /// is handed back so the caller can retry.
    pub fn unmount(mut self) -> Result<D, (Self, FsError)> {
        if self.fds.any_open() {
            return Err((self, FsError::OpenFiles));
        }
        if let Err(e) = self.flush() {
            return Err((self, e));
        }
        info!("unmounted volume");
        Ok(self.dev)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(self.sb.as_bytes());
        self.dev.write(0, &block)?;
        for index in 0..self.sb.fat_blocks as u16 {
            self.dev.write(1 + index, &self.fat.block(index as usize))?;
        }
        self.dev
            .write(self.sb.root_dir_block.get(), &self.dir.block())?;
        self.dev.sync()?;
        Ok(())
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            total_blocks: self.sb.total_blocks.get(),
            fat_blocks: self.sb.fat_blocks,
            root_dir_block: self.sb.root_dir_block.get(),
            data_start: self.sb.data_start.get(),
            data_blocks: self.sb.data_blocks.get(),
            fat_free: self.fat.free_count(),
            dir_free: self.dir.free_count(),
        }
    }

    /// Occupied directory entries, in slot order.
    pub fn files(&self) -> impl Iterator<Item = FileInfo> + '_ {
        self.dir.iter().map(|(_, e)| FileInfo {
            name: ArrayString::from(e.name()).unwrap_or_default(),
            size: e.size(),
            first_block: e.first(),
        })
    }

    /// Creates an empty file.
    pub fn create(&mut self, name: &str) -> Result<(), FsError> {
        if !dir::valid_name(name) {
            return Err(FsError::InvalidName);
        }
        if self.dir.find(name).is_some() {
            return Err(FsError::Exists);
        }
        let slot = self.dir.free_slot().ok_or(FsError::DirectoryFull)?;
        self.dir.entry_mut(slot).init(name);
        debug!("created {name:?}");
        Ok(())
    }

    /// Deletes a file and frees its chain. Refused while a descriptor holds
    /// the file open.
    pub fn remove(&mut self, name: &str) -> Result<(), FsError> {
        let slot = self.dir.find(name).ok_or(FsError::NotFound)?;
        if self.fds.entry_open(slot) {
            return Err(FsError::Busy);
        }
        let first = self.dir.entry(slot).first();
        if first != FAT_EOC {
            let freed = self.fat.release(first)?;
            debug!("removed {name:?}, released {freed} blocks");
        } else {
            debug!("removed empty {name:?}");
        }
        self.dir.entry_mut(slot).clear();
        Ok(())
    }

    /// Opens a file at offset 0 and returns its descriptor.
    pub fn open(&mut self, name: &str) -> Result<Fd, FsError> {
        let slot = self.dir.find(name).ok_or(FsError::NotFound)?;
        self.fds.allocate(slot).ok_or(FsError::TooManyOpen)
    }

    pub fn close(&mut self, fd: Fd) -> Result<(), FsError> {
        self.fds.release(fd)
    }

    /// Current size in bytes of the open file.
    pub fn stat(&self, fd: Fd) -> Result<u32, FsError> {
        let open = self.fds.get(fd)?;
        Ok(self.dir.entry(open.entry).size())
    }

    /// Moves the offset. Any position in `0 ..= size` is legal; the position
    /// equal to the size is where appending writes start.
    pub fn seek(&mut self, fd: Fd, offset: u32) -> Result<(), FsError> {
        let size = self.stat(fd)?;
        if offset > size {
            return Err(FsError::InvalidSeek);
        }
        self.fds.get_mut(fd)?.offset = offset;
        Ok(())
    }

    /// Reads at the current offset into `buf`. Returns the bytes copied,
    /// short at end of file; the offset advances by the same amount.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, FsError> {
        let open = self.fds.get(fd)?;
        let size = self.dir.entry(open.entry).size() as usize;
        let offset = open.offset as usize;
        let n = buf.len().min(size.saturating_sub(offset));
        if n == 0 {
            return Ok(0);
        }

        let chain = self.file_chain(open.entry)?;
        let first = offset / BLOCK_SIZE;
        let last = (offset + n - 1) / BLOCK_SIZE;
        let mut scratch: Vec<Block> = vec![[0; BLOCK_SIZE]; last - first + 1];
        for (slot, &block) in izip!(&mut scratch, &chain[first..=last]) {
            self.dev.read(self.sb.data_start.get() + block, slot)?;
        }
        let covered = scratch.as_flattened();
        let skip = offset - first * BLOCK_SIZE;
        buf[..n].copy_from_slice(&covered[skip..skip + n]);

        self.fds.get_mut(fd)?.offset = (offset + n) as u32;
        Ok(n)
    }

    /// Writes `buf` at the current offset, extending the file as needed.
    /// Returns the bytes written, short when the FAT runs dry; the offset
    /// advances by the same amount.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, FsError> {
        let open = self.fds.get(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let offset = open.offset as usize;
        let size = self.dir.entry(open.entry).size() as usize;
        let first = self.dir.entry(open.entry).first();

        let written = if first == FAT_EOC {
            // The offset is bounded by the size, which is zero here.
            debug_assert_eq!(offset, 0);
            self.write_fresh(open.entry, buf)?
        } else {
            let chain = self.file_chain(open.entry)?;
            if blocks_for(offset + buf.len()) > chain.len() {
                self.write_extend(chain, offset, buf)?
            } else {
                self.patch(&chain, chain.len(), offset, buf)?;
                buf.len()
            }
        };

        if written > 0 {
            let new_size = size.max(offset + written);
            self.dir.entry_mut(open.entry).set_size(new_size as u32);
            self.fds.get_mut(fd)?.offset = (offset + written) as u32;
        }
        Ok(written)
    }

    /// First write into an empty file: allocate a chain sized for the data,
    /// clamped to the free supply, and point the directory entry at it.
    fn write_fresh(&mut self, entry: usize, data: &[u8]) -> Result<usize, FsError> {
        let chain = self.fat.allocate(blocks_for(data.len()));
        let Some(&head) = chain.first() else {
            warn!("write dropped: no free blocks");
            return Ok(0);
        };
        self.dir.entry_mut(entry).set_first(head);

        let writable = data.len().min(chain.len() * BLOCK_SIZE);
        self.patch(&chain, 0, 0, &data[..writable])?;
        if writable < data.len() {
            warn!("short write: {} of {} bytes", writable, data.len());
        }
        Ok(writable)
    }

    /// Write past the current chain: splice freshly allocated blocks onto
    /// the tail, then patch the covered range.
    fn write_extend(
        &mut self,
        mut chain: Vec<u16>,
        offset: usize,
        data: &[u8],
    ) -> Result<usize, FsError> {
        let have = chain.len();
        let grown = self.fat.allocate(blocks_for(offset + data.len()) - have);
        if let (Some(&tail), Some(&head)) = (chain.last(), grown.first()) {
            self.fat.link(tail, head);
        }
        chain.extend_from_slice(&grown);

        let writable = data.len().min(chain.len() * BLOCK_SIZE - offset);
        self.patch(&chain, have, offset, &data[..writable])?;
        if writable < data.len() {
            warn!("short write: {} of {} bytes", writable, data.len());
        }
        Ok(writable)
    }

    /// Copies `data` into the chain's blocks starting at byte `offset`.
    /// Partially covered blocks are read, patched, and written back, except
    /// blocks with ordinal at least `preexisting`: those were freshly
    /// allocated, hold garbage on disk, and get their uncovered bytes
    /// written as zero instead.
    fn patch(
        &mut self,
        chain: &[u16],
        preexisting: usize,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FsError> {
        let data_start = self.sb.data_start.get();
        let mut done = 0;
        while done < data.len() {
            let pos = offset + done;
            let ordinal = pos / BLOCK_SIZE;
            let skip = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - skip).min(data.len() - done);
            let index = data_start + chain[ordinal];
            if n == BLOCK_SIZE {
                self.dev.write(index, &data[done..done + n])?;
            } else {
                let mut scratch: Block = [0; BLOCK_SIZE];
                if ordinal < preexisting {
                    self.dev.read(index, &mut scratch)?;
                }
                scratch[skip..skip + n].copy_from_slice(&data[done..done + n]);
                self.dev.write(index, &scratch)?;
            }
            done += n;
        }
        Ok(())
    }

    /// The file's chain, checked long enough to cover its recorded size.
    fn file_chain(&self, entry: usize) -> Result<Vec<u16>, FsError> {
        let e = self.dir.entry(entry);
        let chain = self.fat.chain(e.first())?;
        if chain.len() * BLOCK_SIZE < e.size() as usize {
            return Err(FsError::Corrupted);
        }
        Ok(chain)
    }
}

fn blocks_for(bytes: usize) -> usize {
    (bytes + BLOCK_SIZE - 1) / BLOCK_SIZE
}
