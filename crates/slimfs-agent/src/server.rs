// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request loop and command handlers of the remote agent

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::sys::stat::{Mode, SFlag};
use nix::sys::time::TimeVal;
use nix::unistd::AccessFlags;
use serde::Serialize;
use serde_json::Value;
use slimfs_proto::{
    encode_response, read_request, Command, DirectoryRecord, EntryRecord, FrameError, Params,
    Payload, Reply, StatAttributes, StatfsRecord, ACCESS_EXEC, ACCESS_READ, ACCESS_WRITE,
    MAX_PAYLOAD_LEN,
};
use tracing::{debug, info, trace, warn};

use crate::error::{AgentError, AgentResult};
use crate::handles::HandleTable;
use crate::paths::ExportRoot;

/// Result of a handler before it is framed.
#[derive(Debug)]
enum Output {
    Value(Value),
    Raw(Vec<u8>),
}

impl Output {
    fn unit() -> Self {
        Output::Value(Value::Null)
    }

    fn of<T: Serialize>(value: &T) -> AgentResult<Self> {
        Ok(Output::Value(serde_json::to_value(value)?))
    }
}

/// Serves protocol requests against an exported directory tree.
pub struct AgentServer {
    root: ExportRoot,
    handles: HandleTable,
}

impl AgentServer {
    pub fn new(root: ExportRoot) -> Self {
        Self {
            root,
            handles: HandleTable::new(),
        }
    }

    pub fn root(&self) -> &ExportRoot {
        &self.root
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Read requests and write one response for each until the peer closes
    /// the stream. Per-command failures are reported to the peer; only
    /// transport failures end the loop with an error.
    pub fn serve<R: Read, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<(), FrameError> {
        info!(root = %self.root.path().display(), "serving requests");
        loop {
            let response = match read_request(reader) {
                Ok((command, payload)) => self.dispatch(&command, payload),
                Err(FrameError::Closed) => {
                    info!(open_handles = self.handles.len(), "client closed the channel");
                    return Ok(());
                }
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "rejecting malformed request");
                    error_payload(&AgentError::Malformed(err.to_string()))
                }
                Err(err) => return Err(err),
            };
            writer.write_all(&frame_reply(&response)?)?;
            writer.flush()?;
        }
    }

    /// Execute one request and build its response payload.
    pub fn dispatch(&mut self, name: &str, payload: Payload) -> Payload {
        let result = name
            .parse::<Command>()
            .map_err(|_| AgentError::UnknownCommand(name.to_string()))
            .and_then(|command| {
                let params = Params::from_payload(payload)?;
                if command.is_mutating() {
                    debug!(%command, "changing the tree");
                }
                self.handle(command, &params)
            });

        match result {
            Ok(Output::Raw(bytes)) => {
                trace!(command = name, len = bytes.len(), "raw reply");
                Payload::Raw(bytes)
            }
            Ok(Output::Value(value)) => {
                trace!(command = name, "ok");
                Payload::Structured(Reply::Ok(value).into_value())
            }
            Err(err) => {
                debug!(command = name, error = %err, "request failed");
                error_payload(&err)
            }
        }
    }

    fn handle(&mut self, command: Command, params: &Params) -> AgentResult<Output> {
        match command {
            Command::Access => self.access(params),
            Command::Chmod => self.chmod(params),
            Command::Create => self.create(params),
            Command::Flush => self.flush(params),
            Command::Fsync => self.fsync(params),
            Command::Getattr => self.getattr(params),
            Command::Link => self.link(params),
            Command::Mkdir => self.mkdir(params),
            Command::Mknod => self.mknod(params),
            Command::Open => self.open(params),
            Command::Read => self.read(params),
            Command::Readdir => self.readdir(params),
            Command::Readlink => self.readlink(params),
            Command::Release => self.release(params),
            Command::Rename => self.rename(params),
            Command::Rmdir => self.rmdir(params),
            Command::Statfs => self.statfs(params),
            Command::Symlink => self.symlink(params),
            Command::Truncate => self.truncate(params),
            Command::Unlink => self.unlink(params),
            Command::Utimens => self.utimens(params),
            Command::Write => self.write(params),
            Command::Xreaddir => self.xreaddir(params),
        }
    }

    fn path(&self, params: &Params, name: &str) -> AgentResult<std::path::PathBuf> {
        Ok(self.root.resolve(params.str(name)?))
    }

    // File handles

    fn open(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let flags = params.i64("flags")? as i32;
        let mode = params.opt_u32("mode")?.unwrap_or(0o666);

        let access = flags & libc::O_ACCMODE;
        let file = OpenOptions::new()
            .read(access == libc::O_RDONLY || access == libc::O_RDWR)
            .write(access == libc::O_WRONLY || access == libc::O_RDWR)
            .custom_flags(flags & !libc::O_ACCMODE)
            .mode(mode)
            .open(&path)?;
        let fh = self.handles.insert(file);
        debug!(path = %path.display(), flags, fh, "opened");
        Ok(Output::Value(Value::from(fh)))
    }

    fn create(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let mode = params.u32("mode")?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&path)?;
        let fh = self.handles.insert(file);
        debug!(path = %path.display(), mode, fh, "created");
        Ok(Output::Value(Value::from(fh)))
    }

    fn read(&mut self, params: &Params) -> AgentResult<Output> {
        let file = self.handles.get_mut(params.u64("fh")?)?;
        let offset = params.u64("offset")?;
        // Short reads are allowed; one reply carries at most one frame.
        let size = params.u64("size")?.min(u64::from(MAX_PAYLOAD_LEN));

        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity(size.min(1 << 20) as usize);
        file.take(size).read_to_end(&mut data)?;
        Ok(Output::Raw(data))
    }

    fn write(&mut self, params: &Params) -> AgentResult<Output> {
        let data = params.bytes("data")?;
        let offset = params.u64("offset")?;
        let file = self.handles.get_mut(params.u64("fh")?)?;

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        Ok(Output::Value(Value::from(data.len())))
    }

    fn release(&mut self, params: &Params) -> AgentResult<Output> {
        let fh = params.u64("fh")?;
        drop(self.handles.remove(fh)?);
        debug!(fh, "released");
        Ok(Output::unit())
    }

    fn flush(&mut self, params: &Params) -> AgentResult<Output> {
        self.handles.get_mut(params.u64("fh")?)?.sync_all()?;
        Ok(Output::unit())
    }

    fn fsync(&mut self, params: &Params) -> AgentResult<Output> {
        let datasync = params.flag("datasync")?;
        let file = self.handles.get_mut(params.u64("fh")?)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(Output::unit())
    }

    // Metadata

    fn access(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let mode = params.u32("mode")?;
        match nix::unistd::access(&path, AccessFlags::from_bits_truncate(mode as i32)) {
            Ok(()) => Ok(Output::Value(Value::Bool(true))),
            Err(nix::errno::Errno::EACCES | nix::errno::Errno::EROFS | nix::errno::Errno::EPERM) => {
                Ok(Output::Value(Value::Bool(false)))
            }
            Err(errno) => Err(errno.into()),
        }
    }

    fn getattr(&mut self, params: &Params) -> AgentResult<Output> {
        let meta = fs::symlink_metadata(self.path(params, "path")?)?;
        Output::of(&StatAttributes::from(&meta))
    }

    fn readdir(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&path)? {
            if let Some(name) = utf8_name(&entry?) {
                entries.push(name);
            }
        }
        entries.sort();

        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(entries);
        Output::of(&names)
    }

    fn xreaddir(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let mut record = DirectoryRecord::new();

        let meta = fs::symlink_metadata(&path)?;
        record.insert(".".to_string(), entry_record(&path, &meta));

        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let Some(name) = utf8_name(&entry) else {
                continue;
            };
            let entry_path = entry.path();
            let meta = match fs::symlink_metadata(&entry_path) {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    trace!(path = %entry_path.display(), "entry vanished during listing");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            record.insert(name, entry_record(&entry_path, &meta));
        }

        debug!(path = %path.display(), entries = record.len(), "listed directory");
        Output::of(&record)
    }

    fn readlink(&mut self, params: &Params) -> AgentResult<Output> {
        let target = fs::read_link(self.path(params, "path")?)?;
        Ok(Output::Raw(target.into_os_string().into_vec()))
    }

    fn statfs(&mut self, params: &Params) -> AgentResult<Output> {
        let stats = nix::sys::statvfs::statvfs(&self.path(params, "path")?)?;
        Output::of(&StatfsRecord {
            f_bsize: stats.block_size() as u64,
            f_frsize: stats.fragment_size() as u64,
            f_blocks: stats.blocks() as u64,
            f_bfree: stats.blocks_free() as u64,
            f_bavail: stats.blocks_available() as u64,
            f_files: stats.files() as u64,
            f_ffree: stats.files_free() as u64,
            f_favail: stats.files_available() as u64,
            f_flag: stats.flags().bits() as u64,
            f_namemax: stats.name_max() as u64,
        })
    }

    // Namespace changes

    fn chmod(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let mode = params.u32("mode")?;
        fs::set_permissions(&path, Permissions::from_mode(mode))?;
        Ok(Output::unit())
    }

    fn mkdir(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let mode = params.u32("mode")?;
        DirBuilder::new().mode(mode).create(&path)?;
        Ok(Output::unit())
    }

    fn mknod(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "filename")?;
        let mode = params.u32("mode")?;
        let device = params.u64("device")?;
        nix::sys::stat::mknod(
            &path,
            SFlag::from_bits_truncate((mode & libc::S_IFMT as u32) as libc::mode_t),
            Mode::from_bits_truncate((mode & 0o7777) as libc::mode_t),
            device as libc::dev_t,
        )?;
        Ok(Output::unit())
    }

    fn link(&mut self, params: &Params) -> AgentResult<Output> {
        let source = self.path(params, "source")?;
        let target = self.path(params, "target")?;
        fs::hard_link(&source, &target)?;
        Ok(Output::unit())
    }

    fn symlink(&mut self, params: &Params) -> AgentResult<Output> {
        // The link content is stored as given; only the new name is confined.
        let source = Path::new(params.str("source")?);
        let target = self.path(params, "target")?;
        std::os::unix::fs::symlink(source, &target)?;
        Ok(Output::unit())
    }

    fn rename(&mut self, params: &Params) -> AgentResult<Output> {
        let old = self.path(params, "old")?;
        let new = self.path(params, "new")?;
        fs::rename(&old, &new)?;
        Ok(Output::unit())
    }

    fn rmdir(&mut self, params: &Params) -> AgentResult<Output> {
        fs::remove_dir(self.path(params, "path")?)?;
        Ok(Output::unit())
    }

    fn unlink(&mut self, params: &Params) -> AgentResult<Output> {
        fs::remove_file(self.path(params, "path")?)?;
        Ok(Output::unit())
    }

    fn truncate(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let length = params.u64("length")?;
        OpenOptions::new().write(true).open(&path)?.set_len(length)?;
        Ok(Output::unit())
    }

    fn utimens(&mut self, params: &Params) -> AgentResult<Output> {
        let path = self.path(params, "path")?;
        let (atime, mtime) = match params.opt_times("times")? {
            Some((atime, mtime)) => (timeval(atime), timeval(mtime)),
            None => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_secs_f64())
                    .unwrap_or(0.0);
                (timeval(now), timeval(now))
            }
        };
        nix::sys::stat::utimes(&path, &atime, &mtime)?;
        Ok(Output::unit())
    }
}

fn error_payload(err: &AgentError) -> Payload {
    Payload::Structured(Reply::Error(err.to_record()).into_value())
}

/// Encode `response`, answering with an error when it does not fit a frame.
fn frame_reply(response: &Payload) -> Result<Vec<u8>, FrameError> {
    match encode_response(response) {
        Err(FrameError::PayloadTooLarge(len)) => {
            warn!(len, "reply exceeds the frame limit");
            encode_response(&error_payload(&AgentError::ReplyTooLarge(len)))
        }
        framed => framed,
    }
}

/// Name of a directory entry, or `None` for names that cannot travel as
/// JSON strings.
fn utf8_name(entry: &fs::DirEntry) -> Option<String> {
    let name = entry.file_name();
    match name.into_string() {
        Ok(name) => Some(name),
        Err(_) => {
            warn!(path = %entry.path().display(), "skipping entry with a non-UTF-8 name");
            None
        }
    }
}

/// Access bits the agent process holds on `path`.
fn probe_access(path: &Path) -> u32 {
    [
        (ACCESS_READ, AccessFlags::R_OK),
        (ACCESS_WRITE, AccessFlags::W_OK),
        (ACCESS_EXEC, AccessFlags::X_OK),
    ]
    .into_iter()
    .filter(|(_, flag)| nix::unistd::access(path, *flag).is_ok())
    .fold(0, |bits, (bit, _)| bits | bit)
}

fn entry_record(path: &Path, meta: &fs::Metadata) -> EntryRecord {
    EntryRecord {
        access: probe_access(path),
        attributes: StatAttributes::from(meta),
    }
}

fn timeval(seconds: f64) -> TimeVal {
    let whole = seconds.floor();
    let micros = ((seconds - whole) * 1_000_000.0).round().min(999_999.0);
    TimeVal::new(whole as libc::time_t, micros as libc::suseconds_t)
}
