//! CLI argument parsing and sidecar resolution.
//!
//! Grounded in `mkfs/src/main.rs`'s `Args` struct for shape: a device
//! path plus a flag, no subcommands. That struct is filled by hand via
//! `env::args()`; here `clap`'s derive API does the parsing instead.
//! `--noinit` mirrors the `has_noinit_flag` name used by the reference
//! mount helper this binary replaces.

use clap::Parser;
use std::path::PathBuf;

/// uxfs: a user-space filesystem mounted over FUSE, backed by a
/// fixed-size emulated block device.
#[derive(Parser, Debug)]
#[command(name = "uxfs", version, about)]
pub struct Args {
    /// Directory to mount the filesystem at.
    pub mountpoint: PathBuf,

    /// Skip formatting: load the existing image and verify its superblock
    /// instead of zeroing the device.
    #[arg(long)]
    pub noinit: bool,
}

/// Path to the `fuse~` sidecar file naming the block-device root,
/// resolved relative to the process working directory.
pub fn sidecar_path() -> PathBuf {
    PathBuf::from("fuse~")
}
