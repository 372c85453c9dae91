//! On-disk layout.
//!
//! Disk layout:
//! [ superblock | FAT (`fat_blocks` blocks) | root directory | data blocks ]
//!
//! All multi-byte fields are little-endian. The superblock and the root
//! directory each occupy exactly one block; the FAT is a packed `u16` array
//! padded with zeros to fill its blocks.

use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::param::{BLOCK_SIZE, FAT_ENTRIES_PER_BLOCK, FAT_EOC, FS_FILENAME_LEN, FS_FILE_MAX_COUNT};

/// Volume signature, first bytes of the superblock.
pub(super) const SIGNATURE: [u8; 8] = *b"ECS150FS";

/// Block 0 of every volume.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
pub(super) struct Superblock {
    pub signature: [u8; 8],
    /// Total block count of the volume, including all metadata blocks.
    pub total_blocks: U16<LittleEndian>,
    pub root_dir_block: U16<LittleEndian>,
    pub data_start: U16<LittleEndian>,
    pub data_blocks: U16<LittleEndian>,
    pub fat_blocks: u8,
    padding: [u8; 4079],
}

const_assert_eq!(core::mem::size_of::<Superblock>(), BLOCK_SIZE);

/// One slot of the root directory. A leading NUL in `name` marks the slot
/// free.
#[repr(C)]
#[derive(Copy, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub(super) struct DirEntry {
    name: [u8; FS_FILENAME_LEN],
    size: U32<LittleEndian>,
    first_block: U16<LittleEndian>,
    padding: [u8; 10],
}

const_assert_eq!(core::mem::size_of::<DirEntry>(), 32);
const_assert_eq!(
    FS_FILE_MAX_COUNT * core::mem::size_of::<DirEntry>(),
    BLOCK_SIZE
);

/// Block counts of a well-formed volume. The relations
/// `total = 1 + fat_blocks + 1 + data_blocks` and
/// `fat_blocks = ceil(2 * data_blocks / BLOCK_SIZE)` always hold.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) struct Geometry {
    pub total: u16,
    pub fat_blocks: u8,
    pub data_blocks: u16,
}

/// Number of FAT blocks needed for `data_blocks` 16-bit entries.
pub(super) fn fat_blocks_for(data_blocks: u16) -> usize {
    (data_blocks as usize * 2 + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// Solves the layout relations for a device of `total` blocks. There is at
/// most one solution; `None` means the device cannot hold a volume.
pub(super) fn fit(total: u16) -> Option<Geometry> {
    for fat_blocks in 1..=u8::MAX {
        let overhead = 2 + fat_blocks as u32;
        if overhead >= total as u32 {
            break;
        }
        let data_blocks = total - 2 - fat_blocks as u16;
        if fat_blocks_for(data_blocks) == fat_blocks as usize {
            return Some(Geometry {
                total,
                fat_blocks,
                data_blocks,
            });
        }
    }
    None
}

impl Superblock {
    pub fn for_geometry(geo: Geometry) -> Self {
        let mut sb = Self::new_zeroed();
        sb.signature = SIGNATURE;
        sb.total_blocks.set(geo.total);
        sb.root_dir_block.set(1 + geo.fat_blocks as u16);
        sb.data_start.set(2 + geo.fat_blocks as u16);
        sb.data_blocks.set(geo.data_blocks);
        sb.fat_blocks = geo.fat_blocks;
        sb
    }

    /// Checks the signature, the device size, and the layout relations.
    /// Anything off means the image was not produced by a compatible
    /// formatter.
    pub fn is_consistent(&self, device_blocks: u16) -> bool {
        let nf = self.fat_blocks as u32;
        let nd = self.data_blocks.get() as u32;
        self.signature == SIGNATURE
            && self.total_blocks.get() == device_blocks
            && nf >= 1
            && self.total_blocks.get() as u32 == 2 + nf + nd
            && self.root_dir_block.get() as u32 == 1 + nf
            && self.data_start.get() as u32 == 2 + nf
            && nd as usize <= nf as usize * FAT_ENTRIES_PER_BLOCK
    }
}

impl DirEntry {
    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    /// The stored name, up to the first NUL.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Claims the slot for a new, empty file with no chain yet. The name
    /// must already be validated.
    pub fn init(&mut self, name: &str) {
        self.name = [0; FS_FILENAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        self.size.set(0);
        self.first_block.set(FAT_EOC);
    }

    /// Returns the slot to the free state.
    pub fn clear(&mut self) {
        *self = Self::new_zeroed();
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn set_size(&mut self, size: u32) {
        self.size.set(size);
    }

    pub fn first(&self) -> u16 {
        self.first_block.get()
    }

    pub fn set_first(&mut self, block: u16) {
        self.first_block.set(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::FAT_EOC;

    #[test]
    fn geometry_fits_the_reference_volume() {
        // 8190 data blocks need 4 FAT blocks, 8196 blocks in total.
        let geo = fit(8196).unwrap();
        assert_eq!(geo.fat_blocks, 4);
        assert_eq!(geo.data_blocks, 8190);
    }

    #[test]
    fn geometry_fits_a_minimal_volume() {
        let geo = fit(4).unwrap();
        assert_eq!(geo.fat_blocks, 1);
        assert_eq!(geo.data_blocks, 1);
    }

    #[test]
    fn geometry_rejects_too_small_devices() {
        assert_eq!(fit(0), None);
        assert_eq!(fit(3), None);
    }

    #[test]
    fn superblock_round_trips_through_bytes() {
        let sb = Superblock::for_geometry(fit(8196).unwrap());
        let bytes = sb.as_bytes().to_vec();
        let back = Superblock::read_from(&bytes[..]).unwrap();
        assert!(back.is_consistent(8196));
        assert_eq!(back.root_dir_block.get(), 5);
        assert_eq!(back.data_start.get(), 6);
    }

    #[test]
    fn superblock_rejects_bad_signature_and_size() {
        let mut sb = Superblock::for_geometry(fit(8196).unwrap());
        assert!(!sb.is_consistent(8195));
        sb.signature[0] = b'X';
        assert!(!sb.is_consistent(8196));
    }

    #[test]
    fn dir_entry_stores_and_clears_names() {
        let mut e = DirEntry::new_zeroed();
        assert!(e.is_free());
        e.init("notes.txt");
        assert!(!e.is_free());
        assert_eq!(e.name(), "notes.txt");
        assert_eq!(e.size(), 0);
        assert_eq!(e.first(), FAT_EOC);
        e.clear();
        assert!(e.is_free());
        assert_eq!(e.first(), 0);
    }
}
