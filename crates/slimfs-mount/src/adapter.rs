// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! slimfs FUSE adapter implementation
//!
//! Maps FUSE operations to path-level [`SlimFs`] calls.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use fuser::{
    FileAttr, FileType, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::{c_int, EACCES, EINVAL, ENAMETOOLONG, ENOENT, ENOSYS};
use slimfs_client::ClientError;
use slimfs_proto::StatAttributes;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::inodes::{self, InodeTable, NAME_MAX};
use crate::ops::SlimFs;

/// How long the kernel may keep attributes and entries it got from us.
const KERNEL_TTL: Duration = Duration::from_secs(1);

const BLOCK_SIZE: u32 = 4096;

fn errno(err: ClientError) -> c_int {
    let code = err.errno();
    debug!(error = %err, code, "operation failed");
    code
}

fn system_time(secs: i64, nsec: i64) -> SystemTime {
    UNIX_EPOCH + Duration::new(secs.max(0) as u64, nsec.clamp(0, 999_999_999) as u32)
}

fn seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}

fn file_kind(attrs: &StatAttributes) -> FileType {
    let kind = attrs.file_type();
    if kind == libc::S_IFDIR as u32 {
        FileType::Directory
    } else if kind == libc::S_IFLNK as u32 {
        FileType::Symlink
    } else if kind == libc::S_IFCHR as u32 {
        FileType::CharDevice
    } else if kind == libc::S_IFBLK as u32 {
        FileType::BlockDevice
    } else if kind == libc::S_IFIFO as u32 {
        FileType::NamedPipe
    } else if kind == libc::S_IFSOCK as u32 {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

/// Convert remote `lstat` attributes to what the kernel expects.
fn file_attr(ino: u64, attrs: &StatAttributes) -> FileAttr {
    FileAttr {
        ino,
        size: attrs.st_size,
        blocks: if attrs.st_blocks > 0 {
            attrs.st_blocks
        } else {
            attrs.st_size.div_ceil(512)
        },
        atime: system_time(attrs.st_atime, attrs.st_atime_nsec),
        mtime: system_time(attrs.st_mtime, attrs.st_mtime_nsec),
        ctime: system_time(attrs.st_ctime, attrs.st_ctime_nsec),
        crtime: system_time(attrs.st_ctime, attrs.st_ctime_nsec),
        kind: file_kind(attrs),
        perm: attrs.permissions() as u16,
        nlink: attrs.st_nlink.try_into().unwrap_or(u32::MAX),
        uid: attrs.st_uid,
        gid: attrs.st_gid,
        rdev: attrs.st_rdev.try_into().unwrap_or(u32::MAX),
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// FUSE filesystem backed by one remote agent.
pub struct SlimFuse {
    fs: SlimFs,
    inodes: InodeTable,
}

impl SlimFuse {
    pub fn new(fs: SlimFs) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
        }
    }

    fn path(&self, ino: u64) -> Result<String, c_int> {
        self.inodes.path(ino).map(str::to_string).ok_or(ENOENT)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        if name.as_bytes().len() > NAME_MAX {
            return Err(ENAMETOOLONG);
        }
        // Paths travel as JSON strings.
        let name = name.to_str().ok_or(EINVAL)?;
        self.inodes.child_path(parent, name).ok_or(ENOENT)
    }

    /// Fetch attributes of a freshly created or looked-up `path` and count
    /// the kernel reference.
    fn entry(&mut self, path: &str) -> Result<FileAttr, c_int> {
        let attrs = self.fs.getattr(path).map_err(errno)?;
        let ino = self.inodes.lookup(path);
        Ok(file_attr(ino, &attrs))
    }

    fn reply_entry(&mut self, path: Result<String, c_int>, reply: ReplyEntry) {
        match path.and_then(|path| self.entry(&path)) {
            Ok(attr) => reply.entry(&KERNEL_TTL, &attr, 0),
            Err(code) => reply.error(code),
        }
    }

    fn set_times(
        &self,
        path: &str,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<(), c_int> {
        let times = match (atime, mtime) {
            (None, None) => return Ok(()),
            (Some(TimeOrNow::Now), Some(TimeOrNow::Now)) => None,
            (atime, mtime) => {
                let current = self.fs.getattr(path).map_err(errno)?;
                let now = SystemTime::now();
                let pick = |time: Option<TimeOrNow>, secs: i64, nsec: i64| match time {
                    Some(TimeOrNow::SpecificTime(time)) => seconds(time),
                    Some(TimeOrNow::Now) => seconds(now),
                    None => secs as f64 + nsec as f64 / 1e9,
                };
                Some((
                    pick(atime, current.st_atime, current.st_atime_nsec),
                    pick(mtime, current.st_mtime, current.st_mtime_nsec),
                ))
            }
        };
        self.fs.utimens(path, times).map_err(errno)
    }
}

impl fuser::Filesystem for SlimFuse {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("slimfs FUSE adapter initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        if self.fs.client().is_broken() {
            warn!("slimfs FUSE adapter destroyed after the agent connection broke");
        } else {
            info!("slimfs FUSE adapter destroyed");
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = self.child(parent, name);
        self.reply_entry(path, reply);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let result = self
            .path(ino)
            .and_then(|path| self.fs.getattr(&path).map_err(errno));
        match result {
            Ok(attrs) => reply.attr(&KERNEL_TTL, &file_attr(ino, &attrs)),
            Err(code) => reply.error(code),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
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
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => {
                reply.error(code);
                return;
            }
        };

        // No command changes ownership.
        if uid.is_some() || gid.is_some() {
            reply.error(ENOSYS);
            return;
        }

        let result = (|| {
            if let Some(mode) = mode {
                self.fs.chmod(&path, mode & 0o7777).map_err(errno)?;
            }
            if let Some(size) = size {
                self.fs.truncate(&path, size).map_err(errno)?;
            }
            self.set_times(&path, atime, mtime)?;
            self.fs.getattr(&path).map_err(errno)
        })();

        match result {
            Ok(attrs) => reply.attr(&KERNEL_TTL, &file_attr(ino, &attrs)),
            Err(code) => reply.error(code),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        match self
            .path(ino)
            .and_then(|path| self.fs.readlink(&path).map_err(errno))
        {
            Ok(target) => reply.data(&target),
            Err(code) => reply.error(code),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = self.child(parent, name).and_then(|path| {
            self.fs
                .mknod(&path, mode, u64::from(rdev))
                .map(|()| path)
                .map_err(errno)
        });
        self.reply_entry(path, reply);
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = self
            .child(parent, name)
            .and_then(|path| self.fs.mkdir(&path, mode).map(|()| path).map_err(errno));
        self.reply_entry(path, reply);
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self
            .child(parent, name)
            .and_then(|path| self.fs.unlink(&path).map(|()| path).map_err(errno))
        {
            Ok(path) => {
                self.inodes.unlinked(&path);
                reply.ok();
            }
            Err(code) => reply.error(code),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self
            .child(parent, name)
            .and_then(|path| self.fs.rmdir(&path).map(|()| path).map_err(errno))
        {
            Ok(path) => {
                self.inodes.unlinked(&path);
                reply.ok();
            }
            Err(code) => reply.error(code),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = self.child(parent, link_name).and_then(|path| {
            let target = target.to_str().ok_or(EINVAL)?;
            self.fs
                .symlink(target, &path)
                .map(|()| path)
                .map_err(errno)
        });
        self.reply_entry(path, reply);
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE and RENAME_EXCHANGE have no protocol equivalent.
        if flags != 0 {
            reply.error(EINVAL);
            return;
        }
        let paths = self
            .child(parent, name)
            .and_then(|old| Ok((old, self.child(newparent, newname)?)));
        match paths.and_then(|(old, new)| {
            self.fs
                .rename(&old, &new)
                .map(|()| (old, new))
                .map_err(errno)
        }) {
            Ok((old, new)) => {
                self.inodes.renamed(&old, &new);
                reply.ok();
            }
            Err(code) => reply.error(code),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let path = self.path(ino).and_then(|source| {
            let target = self.child(newparent, newname)?;
            self.fs
                .link(&source, &target)
                .map(|()| target)
                .map_err(errno)
        });
        self.reply_entry(path, reply);
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        match self
            .path(ino)
            .and_then(|path| self.fs.open(&path, flags).map_err(errno))
        {
            Ok(fh) => reply.opened(fh, 0),
            Err(code) => reply.error(code),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(EINVAL);
            return;
        };
        match self.fs.read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(errno(err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(EINVAL);
            return;
        };
        match self.fs.write(fh, offset, data) {
            Ok(written) => reply.written(written.try_into().unwrap_or(u32::MAX)),
            Err(err) => reply.error(errno(err)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.fs.flush(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno(err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno(err)),
        }
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.fs.fsync(fh, datasync) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno(err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => {
                reply.error(code);
                return;
            }
        };
        let names = match self.fs.readdir(&path) {
            Ok(names) => names,
            Err(err) => {
                reply.error(errno(err));
                return;
            }
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (index, name) in names.iter().enumerate().skip(skip) {
            let (entry_ino, kind) = match name.as_str() {
                "." => (ino, FileType::Directory),
                ".." => {
                    let parent = match path.rsplit_once('/') {
                        Some(("", _)) | None => "/",
                        Some((dir, _)) => dir,
                    };
                    (self.inodes.listed(parent), FileType::Directory)
                }
                _ => {
                    let child = inodes::join(&path, name);
                    let kind = self
                        .fs
                        .getattr(&child)
                        .map(|attrs| file_kind(&attrs))
                        .unwrap_or(FileType::RegularFile);
                    (self.inodes.listed(&child), kind)
                }
            };
            // The offset handed back is that of the next entry.
            if reply.add(entry_ino, (index + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        match self
            .path(ino)
            .and_then(|path| self.fs.statfs(&path).map_err(errno))
        {
            Ok(stats) => reply.statfs(
                stats.f_blocks,
                stats.f_bfree,
                stats.f_bavail,
                stats.f_files,
                stats.f_ffree,
                stats.f_bsize.try_into().unwrap_or(BLOCK_SIZE),
                stats.f_namemax.try_into().unwrap_or(NAME_MAX as u32),
                stats.f_frsize.try_into().unwrap_or(BLOCK_SIZE),
            ),
            Err(code) => reply.error(code),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let mode = u32::try_from(mask).unwrap_or(0);
        match self
            .path(ino)
            .and_then(|path| self.fs.access(&path, mode).map_err(errno))
        {
            Ok(true) => reply.ok(),
            Ok(false) => reply.error(EACCES),
            Err(code) => reply.error(code),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let created = self.child(parent, name).and_then(|path| {
            let fh = self.fs.create(&path, mode).map_err(errno)?;
            Ok((path, fh))
        });
        let (path, fh) = match created {
            Ok(created) => created,
            Err(code) => {
                reply.error(code);
                return;
            }
        };
        match self.entry(&path) {
            Ok(attr) => reply.created(&KERNEL_TTL, &attr, 0, fh, 0),
            Err(code) => {
                // The kernel never learns about the handle, so drop it here.
                let _ = self.fs.release(fh);
                reply.error(code);
            }
        }
    }
}
