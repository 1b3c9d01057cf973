//! `fuser` adapter: translates the VFS-style callbacks of `fs.rs` into
//! `fuser::Filesystem`'s ino-based trait. The core never deals in FUSE
//! inos or `OsStr`; this is the one layer that does.
//!
//! The core's callback surface is phrased path-first, matching the
//! classic libfuse API, but the crate's FUSE binding (`fuser`) is
//! ino-first. FUSE ino `n + 1` always names our inode number `n` (so
//! root inode 0 is FUSE ino 1); a small path cache reconstructs the path
//! a `lookup` needs from its parent's cached path plus the child name,
//! since the core itself never stores parent pointers: parents are
//! found by path, not stored.

use crate::device::FileBlockDevice;
use crate::error::FsError;
use crate::fs::{Attr, FileSystem, TimeUpdate};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::from_secs(1);
const ROOT_FUSE_INO: u64 = 1;

fn to_system_time(ts: (i64, i32)) -> SystemTime {
    if ts.0 >= 0 {
        UNIX_EPOCH + Duration::new(ts.0 as u64, ts.1.max(0) as u32)
    } else {
        UNIX_EPOCH - Duration::new((-ts.0) as u64, 0)
    }
}

fn to_timestamp(t: SystemTime) -> (i64, i32) {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos() as i32),
        Err(e) => (-(e.duration().as_secs() as i64), 0),
    }
}

fn to_file_attr(attr: &Attr) -> FileAttr {
    FileAttr {
        ino: attr.ino as u64 + 1,
        size: attr.size,
        blocks: attr.blocks,
        atime: to_system_time(attr.atime),
        mtime: to_system_time(attr.mtime),
        ctime: to_system_time(attr.ctime),
        crtime: to_system_time(attr.ctime),
        kind: if attr.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        },
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn errno(e: FsError) -> i32 {
    e.to_errno()
}

/// Adapts a path-based [`FileSystem`] to `fuser`'s ino-based callback
/// table.
pub struct Ops {
    fs: FileSystem<FileBlockDevice>,
    paths: HashMap<u64, String>,
}

impl Ops {
    pub fn new(fs: FileSystem<FileBlockDevice>) -> Self {
        let mut paths = HashMap::new();
        paths.insert(ROOT_FUSE_INO, "/".to_string());
        Self { fs, paths }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    fn child_path(parent: &str, name: &OsStr) -> String {
        let name = name.to_string_lossy();
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

impl Filesystem for Ops {
    fn destroy(&mut self) {
        if let Err(e) = self.fs.finalize() {
            log::error!("failed to finalize filesystem on unmount: {e}");
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = Self::child_path(&parent_path, name);
        match self.fs.getattr(&path) {
            Ok(attr) => {
                self.paths.insert(attr.ino as u64 + 1, path);
                reply.entry(&TTL, &to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(errno(e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, _ino: u64, _nlookup: u64) {}

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(errno(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Some(size) = size {
            if let Err(e) = self.fs.truncate(&path, size) {
                reply.error(errno(e));
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            let to_update = |t: Option<TimeOrNow>| match t {
                None => TimeUpdate::Omit,
                Some(TimeOrNow::Now) => TimeUpdate::Now,
                Some(TimeOrNow::SpecificTime(t)) => TimeUpdate::Set(to_timestamp(t)),
            };
            if let Err(e) = self.fs.utimens(&path, to_update(atime), to_update(mtime)) {
                reply.error(errno(e));
                return;
            }
        }
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = Self::child_path(&parent_path, name);
        if let Err(e) = self.fs.mknod(&path) {
            reply.error(errno(e));
            return;
        }
        match self.fs.getattr(&path) {
            Ok(attr) => {
                self.paths.insert(attr.ino as u64 + 1, path);
                reply.entry(&TTL, &to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(errno(e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = Self::child_path(&parent_path, name);
        if let Err(e) = self.fs.mkdir(&path) {
            reply.error(errno(e));
            return;
        }
        match self.fs.getattr(&path) {
            Ok(attr) => {
                self.paths.insert(attr.ino as u64 + 1, path);
                reply.entry(&TTL, &to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(errno(e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = Self::child_path(&parent_path, name);
        match self.fs.unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = Self::child_path(&parent_path, name);
        match self.fs.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(old_parent), Some(new_parent)) = (self.path_of(parent), self.path_of(newparent))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let old_path = Self::child_path(&old_parent, name);
        let new_path = Self::child_path(&new_parent, newname);
        match self.fs.rename(&old_path, &new_path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.open(&path) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(errno(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.read(&path, size as usize, offset.max(0) as u64) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let append = flags & libc::O_APPEND != 0;
        match self.fs.write(&path, data, offset.max(0) as u64, append) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let _ = self.fs.release(ino as u32);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.opendir(&path) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno(e));
                return;
            }
        };
        for (i, (name, child_ino)) in entries.into_iter().enumerate().skip(offset as usize) {
            let fuse_child_ino = child_ino as u64 + 1;
            let kind = if name == "." || name == ".." {
                FileType::Directory
            } else {
                let child_path = Self::child_path(&path, OsStr::new(&name));
                self.paths.insert(fuse_child_ino, child_path.clone());
                match self.fs.getattr(&child_path) {
                    Ok(attr) if attr.is_dir => FileType::Directory,
                    _ => FileType::RegularFile,
                }
            };
            if reply.add(fuse_child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        let _ = self.fs.release(ino as u32);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let s = self.fs.statfs();
        reply.statfs(
            s.total_blocks as u64,
            s.free_blocks as u64,
            s.free_blocks as u64,
            s.total_inodes as u64,
            s.free_inodes as u64,
            s.bsize,
            s.namemax,
            s.bsize,
        );
    }
}
