//! Root directory.
//!
//! A single block of 128 fixed-size entries. Names are unique, at most 15
//! bytes plus the NUL terminator.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::disk::Block;
use crate::param::{BLOCK_SIZE, FS_FILENAME_LEN, FS_FILE_MAX_COUNT};

use super::layout::DirEntry;

/// A name a directory entry can hold: non-empty, under 16 bytes with the
/// terminator, no interior NUL.
pub(super) fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() < FS_FILENAME_LEN && !name.bytes().any(|b| b == 0)
}

pub(super) struct RootDir {
    entries: Box<[DirEntry; FS_FILE_MAX_COUNT]>,
}

impl RootDir {
    pub fn from_block(block: &Block) -> Self {
        // The sizes match exactly, so the decode cannot fail.
        let entries = <[DirEntry; FS_FILE_MAX_COUNT]>::read_from(&block[..])
            .unwrap_or_else(<[DirEntry; FS_FILE_MAX_COUNT]>::new_zeroed);
        Self {
            entries: Box::new(entries),
        }
    }

    pub fn block(&self) -> Block {
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(self.entries.as_bytes());
        out
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_free() && e.name() == name)
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.is_free())
    }

    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_free()).count()
    }

    pub fn entry(&self, index: usize) -> &DirEntry {
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut DirEntry {
        &mut self.entries[index]
    }

    /// Occupied entries with their slot indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_length_boundaries() {
        assert!(valid_name("a"));
        assert!(valid_name("exactly15chars!"));
        assert!(!valid_name("sixteencharslong"));
        assert!(!valid_name(""));
        assert!(!valid_name("nul\0inside"));
    }

    #[test]
    fn directory_round_trips_through_its_block() {
        let mut dir = RootDir::from_block(&[0; BLOCK_SIZE]);
        assert_eq!(dir.free_count(), FS_FILE_MAX_COUNT);

        let slot = dir.free_slot().unwrap();
        dir.entry_mut(slot).init("a.txt");
        let back = RootDir::from_block(&dir.block());
        assert_eq!(back.find("a.txt"), Some(slot));
        assert_eq!(back.free_count(), FS_FILE_MAX_COUNT - 1);
        assert_eq!(back.iter().count(), 1);
    }
}
