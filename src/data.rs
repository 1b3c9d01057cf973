//! File-data addressing through direct and single-indirect pointers.
//!
//! Grounded in `mkfs/src/ext2.rs`'s block-pointer handling, generalized
//! from ext2's triple-indirection to a two-level direct/indirect scheme:
//! 12 direct pointers plus two single-indirect blocks, each holding
//! [`PTRS_PER_BLOCK`] pointers.

use crate::bitmap::{alloc_data_block, free_data_block};
use crate::constants::{
    inode_table_blocks, BLOCK_COUNT, DIRECT_PTRS, INODE_TABLE_START, MAX_LOGICAL_BLOCKS,
    PTRS_PER_BLOCK, PTR_SIZE, SENTINEL,
};
use crate::device::{zero_block, Block, BlockDevice};
use crate::error::{FsError, FsResult};
use crate::inode::INode;
use crate::superblock::Superblock;

/// First block of the data region, following the inode table.
pub fn data_region_start() -> u32 {
    INODE_TABLE_START + inode_table_blocks(std::mem::size_of::<INode>())
}

/// Number of data-region-relative slots the device can actually back,
/// i.e. blocks past the reserved superblock, bitmaps, and inode table.
/// The two data bitmap blocks together have room for more slots than
/// this; allocation and free calls must pass this bound so a relative id
/// never maps past the end of the device.
pub fn data_region_capacity() -> u32 {
    BLOCK_COUNT - data_region_start()
}

fn to_absolute(relative: u32) -> u32 {
    data_region_start() + relative
}

enum Location {
    Direct(usize),
    Indirect { which: usize, slot: usize },
}

fn locate(logical: u64) -> FsResult<Location> {
    let logical = logical as usize;
    if logical >= MAX_LOGICAL_BLOCKS {
        return Err(FsError::FileTooBig);
    }
    if logical < DIRECT_PTRS {
        return Ok(Location::Direct(logical));
    }
    let rest = logical - DIRECT_PTRS;
    Ok(Location::Indirect {
        which: rest / PTRS_PER_BLOCK,
        slot: rest % PTRS_PER_BLOCK,
    })
}

fn read_ptr_block(dev: &dyn BlockDevice, block_relative: i32) -> FsResult<[i32; PTRS_PER_BLOCK]> {
    let mut ptrs = [SENTINEL; PTRS_PER_BLOCK];
    if block_relative == SENTINEL {
        return Ok(ptrs);
    }
    let mut block = zero_block();
    dev.read_block(to_absolute(block_relative as u32), &mut block)?;
    for (i, p) in ptrs.iter_mut().enumerate() {
        let off = i * PTR_SIZE;
        *p = i32::from_ne_bytes(block[off..off + PTR_SIZE].try_into().unwrap());
    }
    Ok(ptrs)
}

fn write_ptr_block(
    dev: &mut dyn BlockDevice,
    block_relative: u32,
    ptrs: &[i32; PTRS_PER_BLOCK],
) -> FsResult<()> {
    let mut block = zero_block();
    for (i, p) in ptrs.iter().enumerate() {
        let off = i * PTR_SIZE;
        block[off..off + PTR_SIZE].copy_from_slice(&p.to_ne_bytes());
    }
    dev.write_block(to_absolute(block_relative), &block)
}

/// Reports whether a physical block is already allocated for logical
/// offset `logical`, without allocating anything.
pub fn is_allocated(dev: &dyn BlockDevice, inode: &INode, logical: u64) -> FsResult<bool> {
    match locate(logical)? {
        Location::Direct(i) => Ok(inode.direct[i] != SENTINEL),
        Location::Indirect { which, slot } => {
            let ind = inode.indirect[which];
            if ind == SENTINEL {
                return Ok(false);
            }
            let ptrs = read_ptr_block(dev, ind)?;
            Ok(ptrs[slot] != SENTINEL)
        }
    }
}

/// Reads the data block at logical offset `logical` within `inode`. Holes
/// (unallocated pointers, or an index past every allocated pointer) read
/// back as zero, matching the allocate-on-write semantics this addressing
/// scheme uses throughout.
pub fn read_data_block(dev: &dyn BlockDevice, inode: &INode, logical: u64) -> FsResult<Block> {
    match locate(logical)? {
        Location::Direct(i) => {
            let ptr = inode.direct[i];
            if ptr == SENTINEL {
                return Ok(zero_block());
            }
            let mut block = zero_block();
            dev.read_block(to_absolute(ptr as u32), &mut block)?;
            Ok(block)
        }
        Location::Indirect { which, slot } => {
            let ind = inode.indirect[which];
            if ind == SENTINEL {
                return Ok(zero_block());
            }
            let ptrs = read_ptr_block(dev, ind)?;
            let ptr = ptrs[slot];
            if ptr == SENTINEL {
                return Ok(zero_block());
            }
            let mut block = zero_block();
            dev.read_block(to_absolute(ptr as u32), &mut block)?;
            Ok(block)
        }
    }
}

/// Writes the data block at logical offset `logical` within `inode`,
/// allocating any direct pointer, indirect block, or indirect pointer
/// that is not yet in place. Mutates `inode` with the newly allocated
/// pointers and raises `block_count` to `logical + 1` if that is higher
/// than its current value; the caller persists the inode.
pub fn write_data_block(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    inode: &mut INode,
    logical: u64,
    data: &Block,
) -> FsResult<()> {
    let capacity = data_region_capacity();
    match locate(logical)? {
        Location::Direct(i) => {
            if inode.direct[i] == SENTINEL {
                let id = alloc_data_block(dev, sb, capacity)?;
                inode.direct[i] = id as i32;
                inode.block_count = inode.block_count.max(logical as u32 + 1);
            }
            dev.write_block(to_absolute(inode.direct[i] as u32), data)
        }
        Location::Indirect { which, slot } => {
            if inode.indirect[which] == SENTINEL {
                let id = alloc_data_block(dev, sb, capacity)?;
                inode.indirect[which] = id as i32;
                write_ptr_block(dev, id, &[SENTINEL; PTRS_PER_BLOCK])?;
            }
            let ind = inode.indirect[which] as u32;
            let mut ptrs = read_ptr_block(dev, ind as i32)?;
            if ptrs[slot] == SENTINEL {
                let id = alloc_data_block(dev, sb, capacity)?;
                ptrs[slot] = id as i32;
                inode.block_count = inode.block_count.max(logical as u32 + 1);
                write_ptr_block(dev, ind, &ptrs)?;
            }
            dev.write_block(to_absolute(ptrs[slot] as u32), data)
        }
    }
}

/// Frees whatever physical block backs logical offset `logical`, if any,
/// and clears the corresponding pointer. Used by shrinking truncate,
/// which frees a suffix of an inode's blocks without touching the rest.
pub fn free_logical_block(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    inode: &mut INode,
    logical: u64,
) -> FsResult<()> {
    let capacity = data_region_capacity();
    match locate(logical)? {
        Location::Direct(i) => {
            if inode.direct[i] != SENTINEL {
                free_data_block(dev, sb, inode.direct[i] as u32, capacity)?;
                inode.direct[i] = SENTINEL;
            }
            Ok(())
        }
        Location::Indirect { which, slot } => {
            let ind = inode.indirect[which];
            if ind == SENTINEL {
                return Ok(());
            }
            let mut ptrs = read_ptr_block(dev, ind)?;
            if ptrs[slot] != SENTINEL {
                free_data_block(dev, sb, ptrs[slot] as u32, capacity)?;
                ptrs[slot] = SENTINEL;
                write_ptr_block(dev, ind as u32, &ptrs)?;
            }
            Ok(())
        }
    }
}

/// Frees every data block and indirect block reachable from `inode`, then
/// resets its pointers and `block_count`. Does not persist the inode.
pub fn free_inode_blocks(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    inode: &mut INode,
) -> FsResult<()> {
    let capacity = data_region_capacity();
    for ptr in inode.direct.iter_mut() {
        if *ptr != SENTINEL {
            free_data_block(dev, sb, *ptr as u32, capacity)?;
            *ptr = SENTINEL;
        }
    }
    for ind in inode.indirect.iter_mut() {
        if *ind != SENTINEL {
            let ptrs = read_ptr_block(dev, *ind)?;
            for p in ptrs.iter() {
                if *p != SENTINEL {
                    free_data_block(dev, sb, *p as u32, capacity)?;
                }
            }
            free_data_block(dev, sb, *ind as u32, capacity)?;
            *ind = SENTINEL;
        }
    }
    inode.block_count = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REG_MODE;
    use crate::device::FileBlockDevice;
    use crate::superblock::Superblock;

    fn fresh() -> (FileBlockDevice, Superblock, INode) {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();
        let sb = Superblock::fresh();
        let inode = INode::new(REG_MODE, (0, 0));
        (dev, sb, inode)
    }

    #[test]
    fn unallocated_index_reads_as_zero() {
        let (dev, _sb, inode) = fresh();
        let block = read_data_block(&dev, &inode, 0).unwrap();
        assert_eq!(block, zero_block());
    }

    #[test]
    fn direct_write_then_read_roundtrips() {
        let (mut dev, mut sb, mut inode) = fresh();
        let mut data = zero_block();
        data[0] = 7;
        write_data_block(&mut dev, &mut sb, &mut inode, 3, &data).unwrap();
        assert_ne!(inode.direct[3], SENTINEL);
        let back = read_data_block(&dev, &inode, 3).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn indirect_write_allocates_the_indirect_block_once() {
        let (mut dev, mut sb, mut inode) = fresh();
        let mut data = zero_block();
        data[0] = 1;
        write_data_block(&mut dev, &mut sb, &mut inode, DIRECT_PTRS as u64, &data).unwrap();
        assert_ne!(inode.indirect[0], SENTINEL);
        let indirect_ptr = inode.indirect[0];

        let mut data2 = zero_block();
        data2[0] = 2;
        write_data_block(&mut dev, &mut sb, &mut inode, DIRECT_PTRS as u64 + 1, &data2).unwrap();
        assert_eq!(inode.indirect[0], indirect_ptr);

        let back = read_data_block(&dev, &inode, DIRECT_PTRS as u64).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn past_every_allocated_pointer_is_too_big() {
        let max_logical =
            (DIRECT_PTRS + crate::constants::INDIRECT_PTRS * PTRS_PER_BLOCK) as u64;
        assert!(matches!(locate(max_logical), Err(FsError::FileTooBig)));
    }

    #[test]
    fn freeing_resets_pointers_and_returns_blocks() {
        let (mut dev, mut sb, mut inode) = fresh();
        let data = zero_block();
        write_data_block(&mut dev, &mut sb, &mut inode, 0, &data).unwrap();
        write_data_block(&mut dev, &mut sb, &mut inode, DIRECT_PTRS as u64, &data).unwrap();
        let free_before = sb.free_blocks;
        free_inode_blocks(&mut dev, &mut sb, &mut inode).unwrap();
        assert_eq!(inode.direct[0], SENTINEL);
        assert_eq!(inode.indirect[0], SENTINEL);
        assert_eq!(inode.block_count, 0);
        assert!(sb.free_blocks > free_before);
    }
}
