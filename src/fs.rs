//! The operations facade. Combines the device, superblock, bitmap,
//! inode, data-addressing, directory, and path layers into a VFS-style
//! callback surface. `ops.rs` is a thin `fuser` adapter in front of
//! this; every method here takes and returns plain paths/bytes, not
//! FUSE-specific types, so it can be driven directly in tests the way
//! `mkfs/src/ext2.rs`'s `Ext2Factory` is driven directly in its own
//! tests.

use crate::bitmap::{alloc_inode, free_inode};
use crate::constants::{
    BLOCK_SIZE, DIRECT_PTRS, DIR_MODE, MAX_FILENAME_LEN, MAX_FILE_SIZE, MAX_LOGICAL_BLOCKS,
    REG_MODE, ROOT_INODE,
};
use crate::data::{
    free_inode_blocks, free_logical_block, is_allocated, read_data_block, write_data_block,
};
use crate::device::{zero_block, BlockDevice};
use crate::dirent::{add_dir_entry, find_in_dir, list_entries, remove_dir_entry};
use crate::error::{FsError, FsResult};
use crate::inode::{read_inode, write_inode, INode};
use crate::path::resolve_path;
use crate::superblock::{load_superblock, persist_superblock, Superblock};
use log::{debug, info, warn};
use std::time::{SystemTime, UNIX_EPOCH};

/// A `timespec`-shaped stamp: seconds since the epoch plus nanoseconds.
pub type Timestamp = (i64, i32);

/// How `utimens` should treat one of the two timestamps, mirroring the
/// FUSE `TimeOrNow`/omit distinction.
#[derive(Clone, Copy, Debug)]
pub enum TimeUpdate {
    Now,
    Set(Timestamp),
    Omit,
}

/// Metadata returned by `getattr`.
#[derive(Clone, Copy, Debug)]
pub struct Attr {
    pub ino: u32,
    pub mode: u32,
    pub is_dir: bool,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
    pub blksize: u32,
    pub blocks: u64,
}

/// Counters returned by `statfs`.
#[derive(Clone, Copy, Debug)]
pub struct StatFs {
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub bsize: u32,
    pub namemax: u32,
}

fn now() -> Timestamp {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs() as i64, d.subsec_nanos() as i32)
}

fn caller_ids() -> (u32, u32) {
    unsafe { (libc::getuid(), libc::getgid()) }
}

fn split_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

fn check_name(name: &str) -> FsResult<()> {
    if name.len() > MAX_FILENAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// Owns the mounted filesystem state: the block device and the in-memory
/// superblock copy that is the single source of truth for free counts
/// between calls.
pub struct FileSystem<D: BlockDevice> {
    dev: D,
    sb: Superblock,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Formats a fresh filesystem: zeroes every block, writes the
    /// superblock, and allocates the root inode as a directory at index 0.
    pub fn format(mut dev: D) -> FsResult<Self> {
        dev.mount(true)?;
        let mut sb = Superblock::fresh();
        persist_superblock(&mut dev, &sb)?;

        let root = alloc_inode(&mut dev, &mut sb)?;
        if root != ROOT_INODE {
            return Err(FsError::Corrupt);
        }
        let root_inode = INode::new(DIR_MODE, now());
        write_inode(&mut dev, ROOT_INODE, &root_inode)?;

        info!("formatted fresh filesystem, root inode at {}", ROOT_INODE);
        Ok(Self { dev, sb })
    }

    /// Loads an existing filesystem image, verifying the superblock magic.
    pub fn load(mut dev: D) -> FsResult<Self> {
        dev.mount(false)?;
        let sb = load_superblock(&dev)?;
        info!(
            "loaded filesystem: {}/{} blocks free, {}/{} inodes free",
            sb.free_blocks, sb.total_blocks, sb.free_inodes, sb.total_inodes
        );
        Ok(Self { dev, sb })
    }

    fn resolve(&self, path: &str) -> FsResult<u32> {
        resolve_path(&self.dev, path)?.ok_or(FsError::NotFound)
    }

    fn resolve_dir(&self, path: &str) -> FsResult<(u32, INode)> {
        let ino = self.resolve(path)?;
        let inode = read_inode(&self.dev, ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok((ino, inode))
    }

    /// Fills the attributes of the inode resolved from `path`.
    pub fn getattr(&self, path: &str) -> FsResult<Attr> {
        let ino = self.resolve(path)?;
        let inode = read_inode(&self.dev, ino)?;
        let (uid, gid) = caller_ids();
        Ok(Attr {
            ino,
            mode: inode.mode,
            is_dir: inode.is_dir(),
            nlink: 1,
            uid,
            gid,
            size: inode.size,
            atime: (inode.atime_sec, inode.atime_nsec),
            mtime: (inode.mtime_sec, inode.mtime_nsec),
            ctime: (inode.ctime_sec, inode.ctime_nsec),
            blksize: BLOCK_SIZE as u32,
            blocks: inode.block_count as u64 * (BLOCK_SIZE as u64 / 512),
        })
    }

    /// Lists `.`, `..`, then every stored entry of the directory at `path`,
    /// in storage order. Updates the directory's atime.
    pub fn readdir(&mut self, path: &str) -> FsResult<Vec<(String, u32)>> {
        let (ino, mut inode) = self.resolve_dir(path)?;
        let parent_ino = if ino == ROOT_INODE {
            ROOT_INODE
        } else {
            let (parent_path, _) = split_path(path);
            self.resolve(&parent_path)?
        };

        let mut out = vec![(".".to_string(), ino), ("..".to_string(), parent_ino)];
        out.extend(list_entries(&self.dev, &inode)?);

        let ts = now();
        inode.atime_sec = ts.0;
        inode.atime_nsec = ts.1;
        write_inode(&mut self.dev, ino, &inode)?;
        Ok(out)
    }

    /// Reads up to `size` bytes starting at `offset`, clamped to the
    /// file's size. Updates atime.
    pub fn read(&mut self, path: &str, size: usize, offset: u64) -> FsResult<Vec<u8>> {
        let ino = self.resolve(path)?;
        let mut inode = read_inode(&self.dev, ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        if offset >= inode.size || size == 0 {
            return Ok(Vec::new());
        }
        let end = inode.size.min(offset + size as u64);
        let mut out = Vec::with_capacity((end - offset) as usize);

        let first_logical = offset / BLOCK_SIZE as u64;
        let last_logical = (end - 1) / BLOCK_SIZE as u64;
        for logical in first_logical..=last_logical {
            let block = read_data_block(&self.dev, &inode, logical)?;
            let block_start = logical * BLOCK_SIZE as u64;
            let from = offset.max(block_start) - block_start;
            let to = end.min(block_start + BLOCK_SIZE as u64) - block_start;
            out.extend_from_slice(&block[from as usize..to as usize]);
        }

        let ts = now();
        inode.atime_sec = ts.0;
        inode.atime_nsec = ts.1;
        write_inode(&mut self.dev, ino, &inode)?;
        Ok(out)
    }

    /// Writes `data` at `offset` (or at end-of-file if `append`),
    /// allocating blocks as needed. Updates mtime/ctime.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64, append: bool) -> FsResult<usize> {
        let ino = self.resolve(path)?;
        let mut inode = read_inode(&self.dev, ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let offset = if append { inode.size } else { offset };
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset + data.len() as u64;
        if end > MAX_FILE_SIZE {
            return Err(FsError::FileTooBig);
        }

        let first_logical = offset / BLOCK_SIZE as u64;
        let last_logical = (end - 1) / BLOCK_SIZE as u64;
        for logical in first_logical..=last_logical {
            let mut block = read_data_block(&self.dev, &inode, logical)?;
            let block_start = logical * BLOCK_SIZE as u64;
            let from = offset.max(block_start) - block_start;
            let to = end.min(block_start + BLOCK_SIZE as u64) - block_start;
            let src_start = (block_start + from).saturating_sub(offset) as usize;
            block[from as usize..to as usize]
                .copy_from_slice(&data[src_start..src_start + (to - from) as usize]);
            write_data_block(&mut self.dev, &mut self.sb, &mut inode, logical, &block)?;
        }

        inode.size = inode.size.max(end);
        let ts = now();
        inode.mtime_sec = ts.0;
        inode.mtime_nsec = ts.1;
        inode.ctime_sec = ts.0;
        inode.ctime_nsec = ts.1;
        write_inode(&mut self.dev, ino, &inode)?;
        Ok(data.len())
    }

    fn create(&mut self, path: &str, mode: u32) -> FsResult<u32> {
        let (parent_path, name) = split_path(path);
        check_name(&name)?;
        let (parent_ino, mut parent_inode) = self.resolve_dir(&parent_path)?;
        if find_in_dir(&self.dev, &parent_inode, name.as_bytes())?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let new_ino = alloc_inode(&mut self.dev, &mut self.sb)?;
        let new_inode = INode::new(mode, now());
        write_inode(&mut self.dev, new_ino, &new_inode)?;

        if let Err(e) = add_dir_entry(
            &mut self.dev,
            &mut self.sb,
            &mut parent_inode,
            name.as_bytes(),
            new_ino,
            now(),
        ) {
            warn!("rolling back inode {new_ino} after failed insert: {e}");
            free_inode(&mut self.dev, &mut self.sb, new_ino)?;
            return Err(e);
        }
        write_inode(&mut self.dev, parent_ino, &parent_inode)?;
        debug!("created {path} as inode {new_ino}");
        Ok(new_ino)
    }

    /// Creates a regular file at `path`.
    pub fn mknod(&mut self, path: &str) -> FsResult<u32> {
        self.create(path, REG_MODE)
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&mut self, path: &str) -> FsResult<u32> {
        self.create(path, DIR_MODE)
    }

    /// Removes the regular file at `path`, freeing its inode and blocks.
    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let (parent_path, name) = split_path(path);
        let (parent_ino, mut parent_inode) = self.resolve_dir(&parent_path)?;
        let target_ino = find_in_dir(&self.dev, &parent_inode, name.as_bytes())?
            .ok_or(FsError::NotFound)?;
        let mut target = read_inode(&self.dev, target_ino)?;
        if target.is_dir() {
            return Err(FsError::IsDirectory);
        }

        remove_dir_entry(&mut self.dev, &mut self.sb, &mut parent_inode, name.as_bytes(), now())?;
        write_inode(&mut self.dev, parent_ino, &parent_inode)?;

        free_inode_blocks(&mut self.dev, &mut self.sb, &mut target)?;
        free_inode(&mut self.dev, &mut self.sb, target_ino)?;
        target.mode = 0;
        write_inode(&mut self.dev, target_ino, &target)?;
        Ok(())
    }

    /// Removes the empty directory at `path`. The root cannot be removed.
    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let target_ino = self.resolve(path)?;
        if target_ino == ROOT_INODE {
            return Err(FsError::Busy);
        }
        let mut target = read_inode(&self.dev, target_ino)?;
        if !target.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !crate::dirent::is_empty(&self.dev, &target)? {
            return Err(FsError::NotEmpty);
        }

        let (parent_path, name) = split_path(path);
        let (parent_ino, mut parent_inode) = self.resolve_dir(&parent_path)?;
        remove_dir_entry(&mut self.dev, &mut self.sb, &mut parent_inode, name.as_bytes(), now())?;
        write_inode(&mut self.dev, parent_ino, &parent_inode)?;

        free_inode_blocks(&mut self.dev, &mut self.sb, &mut target)?;
        free_inode(&mut self.dev, &mut self.sb, target_ino)?;
        target.mode = 0;
        write_inode(&mut self.dev, target_ino, &target)?;
        Ok(())
    }

    /// Moves the entry at `old` to `new`, inserting into the new parent
    /// before removing from the old one, and rolling back the insertion
    /// if the removal fails.
    pub fn rename(&mut self, old: &str, new: &str) -> FsResult<()> {
        let old_ino = self.resolve(old)?;
        let (old_parent_path, old_name) = split_path(old);
        let (new_parent_path, new_name) = split_path(new);
        check_name(&new_name)?;

        let (new_parent_ino, mut new_parent_inode) = self.resolve_dir(&new_parent_path)?;
        if find_in_dir(&self.dev, &new_parent_inode, new_name.as_bytes())?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        add_dir_entry(
            &mut self.dev,
            &mut self.sb,
            &mut new_parent_inode,
            new_name.as_bytes(),
            old_ino,
            now(),
        )?;
        write_inode(&mut self.dev, new_parent_ino, &new_parent_inode)?;

        let (old_parent_ino, mut old_parent_inode) = self.resolve_dir(&old_parent_path)?;
        match remove_dir_entry(
            &mut self.dev,
            &mut self.sb,
            &mut old_parent_inode,
            old_name.as_bytes(),
            now(),
        ) {
            Ok(()) => {
                write_inode(&mut self.dev, old_parent_ino, &old_parent_inode)?;
                Ok(())
            }
            Err(e) => {
                warn!("rename {old} -> {new} rolling back insert: {e}");
                let mut reloaded = read_inode(&self.dev, new_parent_ino)?;
                let _ = remove_dir_entry(
                    &mut self.dev,
                    &mut self.sb,
                    &mut reloaded,
                    new_name.as_bytes(),
                    now(),
                );
                let _ = write_inode(&mut self.dev, new_parent_ino, &reloaded);
                Err(e)
            }
        }
    }

    /// Grows or shrinks the file at `path` to exactly `size` bytes.
    /// Growth only pre-allocates within the direct-pointer region; a size
    /// that would require indirect allocation succeeds without actually
    /// allocating the indirect blocks, preserved here as a deliberate
    /// asymmetry with the shrink path (see DESIGN.md).
    pub fn truncate(&mut self, path: &str, size: u64) -> FsResult<()> {
        if size > MAX_FILE_SIZE {
            return Err(FsError::FileTooBig);
        }
        let ino = self.resolve(path)?;
        let mut inode = read_inode(&self.dev, ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }

        if size > inode.size {
            let last_logical = ((size - 1) / BLOCK_SIZE as u64) as usize;
            for logical in 0..=last_logical.min(DIRECT_PTRS - 1) {
                if !is_allocated(&self.dev, &inode, logical as u64)? {
                    write_data_block(&mut self.dev, &mut self.sb, &mut inode, logical as u64, &zero_block())?;
                }
            }
        } else if size < inode.size {
            if size == 0 {
                free_inode_blocks(&mut self.dev, &mut self.sb, &mut inode)?;
            } else {
                let last_logical = ((size - 1) / BLOCK_SIZE as u64) as usize;
                if is_allocated(&self.dev, &inode, last_logical as u64)? {
                    let mut block = read_data_block(&self.dev, &inode, last_logical as u64)?;
                    let within = (((size - 1) % BLOCK_SIZE as u64) + 1) as usize;
                    for byte in block[within..].iter_mut() {
                        *byte = 0;
                    }
                    write_data_block(&mut self.dev, &mut self.sb, &mut inode, last_logical as u64, &block)?;
                }
                let old_block_count = (inode.block_count as usize).min(MAX_LOGICAL_BLOCKS);
                for logical in (last_logical + 1)..old_block_count {
                    free_logical_block(&mut self.dev, &mut self.sb, &mut inode, logical as u64)?;
                }
                inode.block_count = inode.block_count.min(last_logical as u32 + 1);
            }
        }

        inode.size = size;
        let ts = now();
        inode.mtime_sec = ts.0;
        inode.mtime_nsec = ts.1;
        inode.ctime_sec = ts.0;
        inode.ctime_nsec = ts.1;
        write_inode(&mut self.dev, ino, &inode)?;
        Ok(())
    }

    /// Updates atime/mtime per NOW/OMIT/explicit-value semantics; ctime
    /// is always advanced.
    pub fn utimens(&mut self, path: &str, atime: TimeUpdate, mtime: TimeUpdate) -> FsResult<()> {
        let ino = self.resolve(path)?;
        let mut inode = read_inode(&self.dev, ino)?;
        let ts = now();
        match atime {
            TimeUpdate::Now => {
                inode.atime_sec = ts.0;
                inode.atime_nsec = ts.1;
            }
            TimeUpdate::Set((s, n)) => {
                inode.atime_sec = s;
                inode.atime_nsec = n;
            }
            TimeUpdate::Omit => {}
        }
        match mtime {
            TimeUpdate::Now => {
                inode.mtime_sec = ts.0;
                inode.mtime_nsec = ts.1;
            }
            TimeUpdate::Set((s, n)) => {
                inode.mtime_sec = s;
                inode.mtime_nsec = n;
            }
            TimeUpdate::Omit => {}
        }
        inode.ctime_sec = ts.0;
        inode.ctime_nsec = ts.1;
        write_inode(&mut self.dev, ino, &inode)?;
        Ok(())
    }

    /// Reports free-space counters for `statfs`.
    pub fn statfs(&self) -> StatFs {
        StatFs {
            total_blocks: self.sb.total_blocks,
            free_blocks: self.sb.free_blocks,
            total_inodes: self.sb.total_inodes,
            free_inodes: self.sb.free_inodes,
            bsize: self.sb.block_size,
            namemax: self.sb.max_filename_len,
        }
    }

    /// Validates that `path` exists and is a regular file.
    pub fn open(&self, path: &str) -> FsResult<u32> {
        let ino = self.resolve(path)?;
        let inode = read_inode(&self.dev, ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        Ok(ino)
    }

    /// Validates that `path` exists and is a directory.
    pub fn opendir(&self, path: &str) -> FsResult<u32> {
        let (ino, _) = self.resolve_dir(path)?;
        Ok(ino)
    }

    /// `release`/`releasedir` are no-ops: there is no open file table.
    pub fn release(&self, _ino: u32) -> FsResult<()> {
        Ok(())
    }

    /// Flushes the in-memory superblock one last time before unmount.
    pub fn finalize(&mut self) -> FsResult<()> {
        persist_superblock(&mut self.dev, &self.sb)?;
        info!("finalized filesystem, {} blocks free", self.sb.free_blocks);
        Ok(())
    }
}
