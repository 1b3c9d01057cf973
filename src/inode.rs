//! The on-disk inode and the inode table.
//!
//! Grounded in `mkfs/src/ext2.rs`'s `INode`: a fixed-size `#[repr(C)]`
//! record reinterpreted as bytes, with the table itself a flat array of
//! such records spanning consecutive blocks starting at
//! [`INODE_TABLE_START`]. Unlike ext2, there is one global table here,
//! not one per block group.

use crate::constants::{
    DIRECT_PTRS, INDIRECT_PTRS, INODE_COUNT, INODE_TABLE_START, SENTINEL, TYPE_MASK,
};
use crate::device::{zero_block, BlockDevice};
use crate::error::{FsError, FsResult};
use std::mem::size_of;

/// The on-disk inode. Timestamps are split into seconds and nanoseconds,
/// matching `struct timespec` in the reference FUSE callback signatures.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct INode {
    pub mode: u32,
    pub size: u64,
    pub atime_sec: i64,
    pub atime_nsec: i32,
    pub mtime_sec: i64,
    pub mtime_nsec: i32,
    pub ctime_sec: i64,
    pub ctime_nsec: i32,
    /// Highest allocated logical block index, plus one. Not a count of
    /// allocated blocks; sparse files can have holes below this bound.
    pub block_count: u32,
    pub direct: [i32; DIRECT_PTRS],
    pub indirect: [i32; INDIRECT_PTRS],
}

const INODE_SIZE: usize = size_of::<INode>();

impl INode {
    /// Builds a fresh, empty inode of the given `mode` with all
    /// timestamps set to `now`.
    pub fn new(mode: u32, now: (i64, i32)) -> Self {
        Self {
            mode,
            size: 0,
            atime_sec: now.0,
            atime_nsec: now.1,
            mtime_sec: now.0,
            mtime_nsec: now.1,
            ctime_sec: now.0,
            ctime_nsec: now.1,
            block_count: 0,
            direct: [SENTINEL; DIRECT_PTRS],
            indirect: [SENTINEL; INDIRECT_PTRS],
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & TYPE_MASK == crate::constants::DIR_MODE & TYPE_MASK
    }

    pub fn is_free(&self) -> bool {
        self.mode == 0
    }
}

fn inodes_per_block() -> usize {
    crate::constants::BLOCK_SIZE / INODE_SIZE
}

fn locate(id: u32) -> (u32, usize) {
    let per_block = inodes_per_block() as u32;
    let block = INODE_TABLE_START + id / per_block;
    let offset = (id % per_block) as usize * INODE_SIZE;
    (block, offset)
}

/// Reads inode `id` from the table via a whole-block read.
pub fn read_inode(dev: &dyn BlockDevice, id: u32) -> FsResult<INode> {
    if id >= INODE_COUNT {
        return Err(FsError::InvalidArgument);
    }
    let (block_id, offset) = locate(id);
    let mut block = zero_block();
    dev.read_block(block_id, &mut block)?;
    let mut inode: INode = unsafe { std::mem::zeroed() };
    let bytes = unsafe {
        std::slice::from_raw_parts_mut(&mut inode as *mut INode as *mut u8, INODE_SIZE)
    };
    bytes.copy_from_slice(&block[offset..offset + INODE_SIZE]);
    Ok(inode)
}

/// Writes inode `id` back via a read-modify-write of its containing block.
pub fn write_inode(dev: &mut dyn BlockDevice, id: u32, inode: &INode) -> FsResult<()> {
    if id >= INODE_COUNT {
        return Err(FsError::InvalidArgument);
    }
    let (block_id, offset) = locate(id);
    let mut block = zero_block();
    dev.read_block(block_id, &mut block)?;
    let bytes = unsafe {
        std::slice::from_raw_parts(inode as *const INode as *const u8, INODE_SIZE)
    };
    block[offset..offset + INODE_SIZE].copy_from_slice(bytes);
    dev.write_block(block_id, &block)
}
