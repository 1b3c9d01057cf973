//! Directories as arrays of fixed-size entries packed into a file's data
//! blocks.
//!
//! Grounded in `mkfs/src/ext2.rs`'s directory-entry packing, generalized
//! from ext2's variable-length entries to a fixed-size record. The
//! `Location`/`read_data_block`/`write_data_block` split from `data.rs`
//! is reused unchanged; a directory is simply an inode whose data blocks
//! happen to hold entries instead of raw bytes.

use crate::constants::{MAX_FILENAME_LEN, MAX_LOGICAL_BLOCKS, SENTINEL};
use crate::data::{free_logical_block, is_allocated, read_data_block, write_data_block};
use crate::device::{zero_block, Block, BlockDevice};
use crate::error::{FsError, FsResult};
use crate::inode::INode;
use crate::superblock::Superblock;
use std::mem::size_of;

const NAME_FIELD_LEN: usize = MAX_FILENAME_LEN + 1;

/// One directory entry: an inode number (−1 for a free slot) and a
/// NUL-terminated name. `#[repr(C)]` pads the 4-byte inode number plus
/// 25-byte name field up to natural alignment, giving a 32-byte record.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntry {
    pub inode_num: i32,
    pub name: [u8; NAME_FIELD_LEN],
}

/// Size of one directory entry on disk.
pub const DIRENT_SIZE: usize = size_of::<DirEntry>();
/// Number of entries packed into one 4 KiB block.
pub const ENTRIES_PER_BLOCK: usize = crate::constants::BLOCK_SIZE / DIRENT_SIZE;

impl DirEntry {
    fn free() -> Self {
        Self {
            inode_num: SENTINEL,
            name: [0u8; NAME_FIELD_LEN],
        }
    }

    fn is_free(&self) -> bool {
        self.inode_num == SENTINEL
    }

    fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }

    fn matches(&self, name: &[u8]) -> bool {
        !self.is_free() && self.name_bytes() == name
    }

    fn set_name(&mut self, name: &[u8]) -> FsResult<()> {
        if name.len() > MAX_FILENAME_LEN {
            return Err(FsError::NameTooLong);
        }
        self.name = [0u8; NAME_FIELD_LEN];
        self.name[..name.len()].copy_from_slice(name);
        Ok(())
    }
}

fn entries_from_block(block: &Block) -> Vec<DirEntry> {
    let mut entries = Vec::with_capacity(ENTRIES_PER_BLOCK);
    for i in 0..ENTRIES_PER_BLOCK {
        let off = i * DIRENT_SIZE;
        let mut entry: DirEntry = unsafe { std::mem::zeroed() };
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(&mut entry as *mut DirEntry as *mut u8, DIRENT_SIZE)
        };
        bytes.copy_from_slice(&block[off..off + DIRENT_SIZE]);
        entries.push(entry);
    }
    entries
}

fn entries_to_block(entries: &[DirEntry]) -> Block {
    let mut block = zero_block();
    for (i, entry) in entries.iter().enumerate() {
        let off = i * DIRENT_SIZE;
        let bytes = unsafe {
            std::slice::from_raw_parts(entry as *const DirEntry as *const u8, DIRENT_SIZE)
        };
        block[off..off + DIRENT_SIZE].copy_from_slice(bytes);
    }
    block
}

fn touch(inode: &mut INode, now: (i64, i32)) {
    inode.atime_sec = now.0;
    inode.atime_nsec = now.1;
    inode.mtime_sec = now.0;
    inode.mtime_nsec = now.1;
    inode.ctime_sec = now.0;
    inode.ctime_nsec = now.1;
}

/// Looks up `name` in `dir_inode`, returning its inode number if present.
/// Names longer than [`MAX_FILENAME_LEN`] can never be stored and report
/// not found rather than erroring.
pub fn find_in_dir(dev: &dyn BlockDevice, dir_inode: &INode, name: &[u8]) -> FsResult<Option<u32>> {
    if name.len() > MAX_FILENAME_LEN {
        return Ok(None);
    }
    let limit = (dir_inode.block_count as usize).min(MAX_LOGICAL_BLOCKS);
    for logical in 0..limit {
        let block = read_data_block(dev, dir_inode, logical as u64)?;
        for entry in entries_from_block(&block) {
            if entry.matches(name) {
                return Ok(Some(entry.inode_num as u32));
            }
        }
    }
    Ok(None)
}

/// Inserts a new entry `(name, target_inode)` into `dir_inode`, reusing a
/// free slot in any already-allocated block before extending into a new
/// one. Updates `dir_inode`'s size and timestamps on success.
pub fn add_dir_entry(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    dir_inode: &mut INode,
    name: &[u8],
    target_inode: u32,
    now: (i64, i32),
) -> FsResult<()> {
    if name.len() > MAX_FILENAME_LEN {
        return Err(FsError::NameTooLong);
    }

    for logical in 0..MAX_LOGICAL_BLOCKS {
        if is_allocated(dev, dir_inode, logical as u64)? {
            let block = read_data_block(dev, dir_inode, logical as u64)?;
            let mut entries = entries_from_block(&block);
            if let Some(slot) = entries.iter().position(|e| e.is_free()) {
                entries[slot].inode_num = target_inode as i32;
                entries[slot].set_name(name)?;
                write_data_block(dev, sb, dir_inode, logical as u64, &entries_to_block(&entries))?;
                dir_inode.size += DIRENT_SIZE as u64;
                touch(dir_inode, now);
                return Ok(());
            }
        } else {
            let mut entries = vec![DirEntry::free(); ENTRIES_PER_BLOCK];
            entries[0].inode_num = target_inode as i32;
            entries[0].set_name(name)?;
            write_data_block(dev, sb, dir_inode, logical as u64, &entries_to_block(&entries))?;
            dir_inode.size += DIRENT_SIZE as u64;
            touch(dir_inode, now);
            return Ok(());
        }
    }
    Err(FsError::NoSpace)
}

/// Removes the entry named `name` from `dir_inode`. The entry's slot is
/// marked free in place; if that empties the containing block, the block
/// itself is freed and `block_count` is lowered back to the highest
/// still-allocated index, so `mkdir` followed by `rmdir` restores the
/// superblock's free-block count exactly.
pub fn remove_dir_entry(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    dir_inode: &mut INode,
    name: &[u8],
    now: (i64, i32),
) -> FsResult<()> {
    let limit = (dir_inode.block_count as usize).min(MAX_LOGICAL_BLOCKS);
    for logical in 0..limit {
        if !is_allocated(dev, dir_inode, logical as u64)? {
            continue;
        }
        let block = read_data_block(dev, dir_inode, logical as u64)?;
        let mut entries = entries_from_block(&block);
        if let Some(slot) = entries.iter().position(|e| e.matches(name)) {
            entries[slot] = DirEntry::free();
            if entries.iter().all(|e| e.is_free()) {
                free_logical_block(dev, sb, dir_inode, logical as u64)?;
                dir_inode.block_count = highest_allocated_index_plus_one(dev, dir_inode)?;
            } else {
                write_data_block(dev, sb, dir_inode, logical as u64, &entries_to_block(&entries))?;
            }
            touch(dir_inode, now);
            return Ok(());
        }
    }
    Err(FsError::NotFound)
}

/// Scans downward from `dir_inode.block_count` for the highest logical
/// index that still has a block allocated, returning one past it (or 0 if
/// none remain). Used after freeing a now-empty block to keep
/// `block_count` matching its "highest allocated index, plus one"
/// definition.
fn highest_allocated_index_plus_one(dev: &dyn BlockDevice, dir_inode: &INode) -> FsResult<u32> {
    let limit = (dir_inode.block_count as usize).min(MAX_LOGICAL_BLOCKS);
    for logical in (0..limit).rev() {
        if is_allocated(dev, dir_inode, logical as u64)? {
            return Ok(logical as u32 + 1);
        }
    }
    Ok(0)
}

/// Lists every stored (non-free) entry in `dir_inode`, in on-disk storage
/// order. Does not include the synthetic "." and ".." names; callers
/// building a `readdir` reply add those themselves.
pub fn list_entries(dev: &dyn BlockDevice, dir_inode: &INode) -> FsResult<Vec<(String, u32)>> {
    let limit = (dir_inode.block_count as usize).min(MAX_LOGICAL_BLOCKS);
    let mut out = Vec::new();
    for logical in 0..limit {
        if !is_allocated(dev, dir_inode, logical as u64)? {
            continue;
        }
        let block = read_data_block(dev, dir_inode, logical as u64)?;
        for entry in entries_from_block(&block) {
            if !entry.is_free() {
                let name = String::from_utf8_lossy(entry.name_bytes()).into_owned();
                out.push((name, entry.inode_num as u32));
            }
        }
    }
    Ok(out)
}

/// Reports whether every entry in `dir_inode` is free.
pub fn is_empty(dev: &dyn BlockDevice, dir_inode: &INode) -> FsResult<bool> {
    let limit = (dir_inode.block_count as usize).min(MAX_LOGICAL_BLOCKS);
    for logical in 0..limit {
        if !is_allocated(dev, dir_inode, logical as u64)? {
            continue;
        }
        let block = read_data_block(dev, dir_inode, logical as u64)?;
        if entries_from_block(&block).iter().any(|e| !e.is_free()) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DIRECT_PTRS, DIR_MODE};
    use crate::device::FileBlockDevice;
    use crate::superblock::Superblock;

    fn fresh() -> (FileBlockDevice, Superblock, INode) {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();
        let sb = Superblock::fresh();
        let inode = INode::new(DIR_MODE, (0, 0));
        (dev, sb, inode)
    }

    #[test]
    fn insert_then_find_roundtrips() {
        let (mut dev, mut sb, mut inode) = fresh();
        add_dir_entry(&mut dev, &mut sb, &mut inode, b"hello", 7, (1, 0)).unwrap();
        assert_eq!(inode.size, DIRENT_SIZE as u64);
        assert_eq!(find_in_dir(&dev, &inode, b"hello").unwrap(), Some(7));
        assert_eq!(find_in_dir(&dev, &inode, b"nope").unwrap(), None);
    }

    #[test]
    fn remove_frees_the_block_once_it_holds_no_entries() {
        let (mut dev, mut sb, mut inode) = fresh();
        let free_before_add = sb.free_blocks;
        add_dir_entry(&mut dev, &mut sb, &mut inode, b"a", 1, (1, 0)).unwrap();
        assert_eq!(sb.free_blocks, free_before_add - 1);
        remove_dir_entry(&mut dev, &mut sb, &mut inode, b"a", (2, 0)).unwrap();
        assert_eq!(find_in_dir(&dev, &inode, b"a").unwrap(), None);
        assert_eq!(sb.free_blocks, free_before_add);
        assert_eq!(inode.block_count, 0);
        assert!(is_empty(&dev, &inode).unwrap());
    }

    #[test]
    fn removed_slot_is_reused_before_growing_while_the_block_still_has_entries() {
        let (mut dev, mut sb, mut inode) = fresh();
        add_dir_entry(&mut dev, &mut sb, &mut inode, b"a", 1, (1, 0)).unwrap();
        add_dir_entry(&mut dev, &mut sb, &mut inode, b"b", 2, (1, 0)).unwrap();
        remove_dir_entry(&mut dev, &mut sb, &mut inode, b"a", (2, 0)).unwrap();
        let allocated_before = sb.free_blocks;
        add_dir_entry(&mut dev, &mut sb, &mut inode, b"c", 3, (3, 0)).unwrap();
        assert_eq!(sb.free_blocks, allocated_before);
        assert_eq!(find_in_dir(&dev, &inode, b"c").unwrap(), Some(3));
    }

    #[test]
    fn spills_into_indirect_addressing_past_direct_capacity() {
        let (mut dev, mut sb, mut inode) = fresh();
        let entries_total = DIRECT_PTRS * ENTRIES_PER_BLOCK;
        for i in 0..entries_total {
            let name = format!("f{i}");
            add_dir_entry(&mut dev, &mut sb, &mut inode, name.as_bytes(), i as u32, (1, 0)).unwrap();
        }
        assert!(inode.indirect[0] == SENTINEL);
        add_dir_entry(&mut dev, &mut sb, &mut inode, b"spill", 999, (1, 0)).unwrap();
        assert_ne!(inode.indirect[0], SENTINEL);
        assert_eq!(find_in_dir(&dev, &inode, b"spill").unwrap(), Some(999));
    }

    #[test]
    fn oversized_name_is_rejected() {
        let (mut dev, mut sb, mut inode) = fresh();
        let name = vec![b'x'; MAX_FILENAME_LEN + 1];
        assert!(matches!(
            add_dir_entry(&mut dev, &mut sb, &mut inode, &name, 1, (0, 0)),
            Err(FsError::NameTooLong)
        ));
    }
}
