//! uxfs: a user-space FUSE filesystem over a fixed-size emulated block
//! device. See `fs.rs` for the operations facade and `ops.rs` for the
//! `fuser` adapter; everything else is the on-disk core, laid out layer
//! by layer from the block device up.

pub mod bitmap;
pub mod config;
pub mod constants;
pub mod data;
pub mod device;
pub mod dirent;
pub mod error;
pub mod fs;
pub mod inode;
pub mod ops;
pub mod path;
pub mod superblock;
