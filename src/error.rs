//! Filesystem error type and its mapping to POSIX errno values.
//!
//! The core never returns negated integers the way the original C
//! reference does; `ops.rs` is the single place a [`FsError`] is turned
//! into an errno for the FUSE reply.

use std::io;
use thiserror::Error;

/// An error produced by any core filesystem operation.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file or directory already exists")]
    AlreadyExists,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("device or resource busy")]
    Busy,
    #[error("filename too long")]
    NameTooLong,
    #[error("no space left on device")]
    NoSpace,
    #[error("file too large")]
    FileTooBig,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("on-disk structure is corrupt")]
    Corrupt,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Maps this error to the POSIX errno the FUSE layer should reply with.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::IsDirectory => libc::EISDIR,
            Self::NotADirectory => libc::ENOTDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::Busy => libc::EBUSY,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NoSpace => libc::ENOSPC,
            Self::FileTooBig => libc::EFBIG,
            Self::InvalidArgument => libc::EINVAL,
            Self::Corrupt | Self::Io(_) => libc::EIO,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
