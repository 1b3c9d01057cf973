//! The superblock: persistent free-space accounting.
//!
//! Grounded in `mkfs/src/ext2.rs`'s `Superblock`: a `#[repr(C)]` struct
//! reinterpreted as bytes and written at a fixed block with
//! `seek`/`write_all`. Unlike ext2 there are no block groups here, so
//! the layout collapses to one flat record.

use crate::constants::{
    BLOCK_COUNT, BLOCK_SIZE, INODE_COUNT, MAX_FILENAME_LEN, SUPERBLOCK_BLOCK, SUPERBLOCK_MAGIC,
};
use crate::device::{zero_block, Block, BlockDevice};
use crate::error::{FsError, FsResult};
use std::mem::size_of;

/// The on-disk superblock. `#[repr(C)]` so its byte layout is fixed
/// within a build; it is host-endian and not portable across
/// architectures.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Superblock {
    pub magic: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub max_filename_len: u32,
}

impl Superblock {
    /// Builds the superblock for a freshly formatted filesystem.
    pub fn fresh() -> Self {
        Self {
            magic: SUPERBLOCK_MAGIC,
            block_size: BLOCK_SIZE as u32,
            total_blocks: BLOCK_COUNT,
            free_blocks: BLOCK_COUNT,
            total_inodes: INODE_COUNT,
            free_inodes: INODE_COUNT,
            max_filename_len: MAX_FILENAME_LEN as u32,
        }
    }

    fn to_block(self) -> Block {
        let mut block = zero_block();
        let bytes = unsafe {
            std::slice::from_raw_parts(&self as *const Self as *const u8, size_of::<Self>())
        };
        block[..bytes.len()].copy_from_slice(bytes);
        block
    }

    fn from_block(block: &Block) -> FsResult<Self> {
        let mut sb: Self = unsafe { std::mem::zeroed() };
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(&mut sb as *mut Self as *mut u8, size_of::<Self>())
        };
        bytes.copy_from_slice(&block[..bytes.len()]);
        if sb.magic != SUPERBLOCK_MAGIC {
            return Err(FsError::Corrupt);
        }
        Ok(sb)
    }
}

/// Reads the superblock from block 0.
pub fn load_superblock(dev: &dyn BlockDevice) -> FsResult<Superblock> {
    let mut block = zero_block();
    dev.read_block(SUPERBLOCK_BLOCK, &mut block)?;
    Superblock::from_block(&block)
}

/// Writes the superblock to block 0.
pub fn persist_superblock(dev: &mut dyn BlockDevice, sb: &Superblock) -> FsResult<()> {
    dev.write_block(SUPERBLOCK_BLOCK, &sb.to_block())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FileBlockDevice;

    #[test]
    fn roundtrips_through_a_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();

        let sb = Superblock::fresh();
        persist_superblock(&mut dev, &sb).unwrap();
        let loaded = load_superblock(&dev).unwrap();
        assert_eq!(loaded.magic, SUPERBLOCK_MAGIC);
        assert_eq!(loaded.free_blocks, BLOCK_COUNT);
        assert_eq!(loaded.free_inodes, INODE_COUNT);
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();
        assert!(load_superblock(&dev).is_err());
    }
}
