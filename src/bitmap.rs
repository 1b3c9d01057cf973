//! Bitmap manager: first-fit free-space accounting for inodes and data
//! blocks.
//!
//! Grounded in `mkfs/src/ext2.rs`'s `fill_bitmap`: bitmaps are flat byte
//! (here, word) arrays written back to fixed blocks. Unlike ext2's
//! per-group bitmaps, both bitmaps here are global: the inode bitmap is
//! one block, the data bitmap is two.

use crate::constants::{
    BITMAP_BITS_PER_BLOCK, BITMAP_WORDS_PER_BLOCK, BITMAP_WORD_BITS, DATA_BITMAP_BLOCK_0,
    DATA_BITMAP_BLOCK_1, INODE_BITMAP_BLOCK, INODE_COUNT,
};
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::superblock::{persist_superblock, Superblock};

/// One bitmap block's worth of words.
pub type BitmapWords = [u32; BITMAP_WORDS_PER_BLOCK];

/// Reads a bitmap block as an array of 32-bit words.
pub fn read_bitmap(dev: &dyn BlockDevice, block_id: u32) -> FsResult<BitmapWords> {
    let mut block = crate::device::zero_block();
    dev.read_block(block_id, &mut block)?;
    let mut words = [0u32; BITMAP_WORDS_PER_BLOCK];
    for (i, w) in words.iter_mut().enumerate() {
        let off = i * 4;
        *w = u32::from_ne_bytes(block[off..off + 4].try_into().unwrap());
    }
    Ok(words)
}

/// Writes a bitmap block back from an array of 32-bit words.
pub fn write_bitmap(dev: &mut dyn BlockDevice, block_id: u32, words: &BitmapWords) -> FsResult<()> {
    let mut block = crate::device::zero_block();
    for (i, w) in words.iter().enumerate() {
        let off = i * 4;
        block[off..off + 4].copy_from_slice(&w.to_ne_bytes());
    }
    dev.write_block(block_id, &block)
}

fn set_bit(words: &mut BitmapWords, bit: u32) {
    let word = bit / BITMAP_WORD_BITS;
    let off = bit % BITMAP_WORD_BITS;
    words[word as usize] |= 1 << off;
}

fn clear_bit(words: &mut BitmapWords, bit: u32) {
    let word = bit / BITMAP_WORD_BITS;
    let off = bit % BITMAP_WORD_BITS;
    words[word as usize] &= !(1 << off);
}

/// First-fit scan of `words` for the lowest-index clear bit below `limit`.
fn first_fit(words: &BitmapWords, limit: u32) -> Option<u32> {
    for word_idx in 0..BITMAP_WORDS_PER_BLOCK {
        let word = words[word_idx];
        if word == u32::MAX {
            continue;
        }
        for bit in 0..BITMAP_WORD_BITS {
            let id = word_idx as u32 * BITMAP_WORD_BITS + bit;
            if id >= limit {
                return None;
            }
            if word & (1 << bit) == 0 {
                return Some(id);
            }
        }
    }
    None
}

/// Allocates the lowest-numbered free inode, marking it used. Returns
/// [`FsError::NoSpace`] if the inode bitmap is exhausted, leaving all
/// state unchanged.
pub fn alloc_inode(dev: &mut dyn BlockDevice, sb: &mut Superblock) -> FsResult<u32> {
    let mut words = read_bitmap(dev, INODE_BITMAP_BLOCK)?;
    let id = first_fit(&words, INODE_COUNT).ok_or(FsError::NoSpace)?;
    set_bit(&mut words, id);
    write_bitmap(dev, INODE_BITMAP_BLOCK, &words)?;
    sb.free_inodes -= 1;
    persist_superblock(dev, sb)?;
    Ok(id)
}

/// Frees inode `id`. Only range-checked; double-freeing an already-free
/// inode is the caller's responsibility to avoid.
pub fn free_inode(dev: &mut dyn BlockDevice, sb: &mut Superblock, id: u32) -> FsResult<()> {
    if id >= INODE_COUNT {
        return Err(FsError::InvalidArgument);
    }
    let mut words = read_bitmap(dev, INODE_BITMAP_BLOCK)?;
    clear_bit(&mut words, id);
    write_bitmap(dev, INODE_BITMAP_BLOCK, &words)?;
    sb.free_inodes += 1;
    persist_superblock(dev, sb)
}

/// Allocates the lowest-numbered free data block, relative to the start
/// of the data region. Scans block 2 (slots `[0, 32768)`) before block 3
/// (slots `[32768, 65536)`). `capacity` bounds the search to data-region-
/// relative ids that actually map to a block within the device (the two
/// bitmap blocks together address more slots than the data region has,
/// since the region starts after the reserved superblock/bitmap/inode-
/// table blocks).
pub fn alloc_data_block(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    capacity: u32,
) -> FsResult<u32> {
    let low_limit = capacity.min(BITMAP_BITS_PER_BLOCK);
    let mut low = read_bitmap(dev, DATA_BITMAP_BLOCK_0)?;
    if let Some(id) = first_fit(&low, low_limit) {
        set_bit(&mut low, id);
        write_bitmap(dev, DATA_BITMAP_BLOCK_0, &low)?;
        sb.free_blocks -= 1;
        persist_superblock(dev, sb)?;
        return Ok(id);
    }
    let high_limit = capacity.saturating_sub(BITMAP_BITS_PER_BLOCK);
    let mut high = read_bitmap(dev, DATA_BITMAP_BLOCK_1)?;
    let id = first_fit(&high, high_limit).ok_or(FsError::NoSpace)?;
    set_bit(&mut high, id);
    write_bitmap(dev, DATA_BITMAP_BLOCK_1, &high)?;
    sb.free_blocks -= 1;
    persist_superblock(dev, sb)?;
    Ok(id + BITMAP_BITS_PER_BLOCK)
}

/// Frees data-region-relative block `id`. Only range-checked.
pub fn free_data_block(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    id: u32,
    capacity: u32,
) -> FsResult<()> {
    if id >= capacity {
        return Err(FsError::InvalidArgument);
    }
    let (block_id, bit) = if id < BITMAP_BITS_PER_BLOCK {
        (DATA_BITMAP_BLOCK_0, id)
    } else {
        (DATA_BITMAP_BLOCK_1, id - BITMAP_BITS_PER_BLOCK)
    };
    let mut words = read_bitmap(dev, block_id)?;
    clear_bit(&mut words, bit);
    write_bitmap(dev, block_id, &words)?;
    sb.free_blocks += 1;
    persist_superblock(dev, sb)
}
