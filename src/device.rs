//! The block device collaborator.
//!
//! `FileBlockDevice` emulates the 256 MiB, 65536 x 4096-byte block
//! device as a directory of `block0`..`block65535` files, one block per
//! file, exactly as the reference `disk.c` helper does. I/O is
//! unbuffered and bit-exact: each call opens, does one whole-block
//! operation, and closes, so nothing is cached across calls.

use crate::constants::{BLOCK_COUNT, BLOCK_SIZE};
use crate::error::{FsError, FsResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A single 4 KiB block.
pub type Block = [u8; BLOCK_SIZE];

/// Returns a zero-filled block.
pub fn zero_block() -> Block {
    [0u8; BLOCK_SIZE]
}

/// Raw block I/O, kept as a trait so the core can be exercised against a
/// fake in tests without touching the filesystem.
pub trait BlockDevice {
    /// Prepares the device for use. When `init` is true every block is
    /// zeroed (a fresh device); when false the device is assumed to
    /// already hold a valid image.
    fn mount(&mut self, init: bool) -> FsResult<()>;
    /// Reads block `id` in full.
    fn read_block(&self, id: u32, buf: &mut Block) -> FsResult<()>;
    /// Writes block `id` in full.
    fn write_block(&mut self, id: u32, buf: &Block) -> FsResult<()>;
}

/// A [`BlockDevice`] backed by one regular file per block, rooted at a
/// directory resolved from the `fuse~` sidecar file (see `config.rs`).
pub struct FileBlockDevice {
    root: PathBuf,
}

impl FileBlockDevice {
    /// Creates a device rooted at `root`. Does not touch the filesystem;
    /// call [`BlockDevice::mount`] to create or validate the block files.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn block_path(&self, id: u32) -> PathBuf {
        self.root.join(format!("block{id}"))
    }
}

impl BlockDevice for FileBlockDevice {
    fn mount(&mut self, init: bool) -> FsResult<()> {
        fs::create_dir_all(&self.root)?;
        if !init {
            return Ok(());
        }
        let zero = zero_block();
        for id in 0..BLOCK_COUNT {
            let mut f = File::create(self.block_path(id))?;
            f.write_all(&zero)?;
        }
        Ok(())
    }

    fn read_block(&self, id: u32, buf: &mut Block) -> FsResult<()> {
        if id >= BLOCK_COUNT {
            return Err(FsError::InvalidArgument);
        }
        let mut f = File::open(self.block_path(id))?;
        f.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&mut self, id: u32, buf: &Block) -> FsResult<()> {
        if id >= BLOCK_COUNT {
            return Err(FsError::InvalidArgument);
        }
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.block_path(id))?;
        f.write_all(buf)?;
        Ok(())
    }
}

/// Reads the absolute block-device directory path out of a `fuse~`
/// sidecar file: the first whitespace-delimited token on its first line.
pub fn read_sidecar(path: &Path) -> FsResult<PathBuf> {
    let contents = fs::read_to_string(path)?;
    let token = contents
        .split_whitespace()
        .next()
        .ok_or(FsError::InvalidArgument)?;
    Ok(PathBuf::from(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_init_zeroes_all_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();

        let mut buf = [0xffu8; BLOCK_SIZE];
        dev.read_block(0, &mut buf).unwrap();
        assert_eq!(buf, zero_block());
        dev.read_block(BLOCK_COUNT - 1, &mut buf).unwrap();
        assert_eq!(buf, zero_block());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();

        let mut block = zero_block();
        block[0] = 0xab;
        block[BLOCK_SIZE - 1] = 0xcd;
        dev.write_block(42, &block).unwrap();

        let mut out = zero_block();
        dev.read_block(42, &mut out).unwrap();
        assert_eq!(out, block);
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::new(dir.path().to_path_buf());
        dev.mount(true).unwrap();

        let block = zero_block();
        assert!(dev.write_block(BLOCK_COUNT, &block).is_err());
        let mut buf = zero_block();
        assert!(dev.read_block(BLOCK_COUNT, &mut buf).is_err());
    }

    #[test]
    fn sidecar_reads_first_token() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("fuse~");
        fs::write(&sidecar, "/tmp/uxfs-disk \n").unwrap();
        assert_eq!(read_sidecar(&sidecar).unwrap(), PathBuf::from("/tmp/uxfs-disk"));
    }
}
