// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Blocking protocol client with one request in flight

use std::io::{Read, Write};
use std::process::Child;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use slimfs_proto::{
    encode_bytes, Command, DirectoryRecord, Payload, Reply, StatAttributes, StatfsRecord,
};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::launcher::{self, LaunchConfig};
use crate::session::Session;

/// Client end of an agent channel.
///
/// Calls from any number of threads are serialized by one lock: a request
/// is written and its response read before the next request starts.
pub struct ProtocolClient {
    session: Mutex<Session>,
    child: Mutex<Option<Child>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProtocolClient {
    /// Use an already connected stream pair.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            session: Mutex::new(Session::new(reader, writer)),
            child: Mutex::new(None),
        }
    }

    /// Start an agent over ssh and connect to it.
    pub fn launch(config: &LaunchConfig) -> ClientResult<Self> {
        let agent = launcher::launch(config)?;
        Ok(Self {
            session: Mutex::new(Session::new(agent.stdout, agent.stdin)),
            child: Mutex::new(Some(agent.child)),
        })
    }

    pub fn is_broken(&self) -> bool {
        lock(&self.session).is_broken()
    }

    /// Send any command name with any payload and decode the reply
    /// envelope. Raw responses are returned unchanged.
    pub fn call(&self, command: &str, payload: Payload) -> ClientResult<Payload> {
        let response = lock(&self.session).call(command, &payload)?;
        match response {
            Payload::Raw(bytes) => Ok(Payload::Raw(bytes)),
            Payload::Structured(value) => {
                let reply: Reply = serde_json::from_value(value).map_err(|err| {
                    ClientError::Protocol(format!("malformed reply to {}: {}", command, err))
                })?;
                match reply.into_result() {
                    Ok(value) => Ok(Payload::Structured(value)),
                    Err(record) => {
                        debug!(command, kind = record.kind.as_str(), code = record.code, "remote error");
                        Err(record.into())
                    }
                }
            }
        }
    }

    pub fn command(&self, command: Command, params: Value) -> ClientResult<Payload> {
        self.call(command.name(), Payload::Structured(params))
    }

    fn value<T: DeserializeOwned>(&self, command: Command, params: Value) -> ClientResult<T> {
        match self.command(command, params)? {
            Payload::Structured(value) => serde_json::from_value(value).map_err(|err| {
                ClientError::Protocol(format!("unexpected result for {}: {}", command, err))
            }),
            Payload::Raw(_) => Err(ClientError::Protocol(format!(
                "{} returned raw bytes",
                command
            ))),
        }
    }

    fn unit(&self, command: Command, params: Value) -> ClientResult<()> {
        self.command(command, params).map(drop)
    }

    fn raw(&self, command: Command, params: Value) -> ClientResult<Vec<u8>> {
        match self.command(command, params)? {
            Payload::Raw(bytes) => Ok(bytes),
            Payload::Structured(_) => Err(ClientError::Protocol(format!(
                "{} returned a structured value",
                command
            ))),
        }
    }

    pub fn access(&self, path: &str, mode: u32) -> ClientResult<bool> {
        self.value(Command::Access, json!({"path": path, "mode": mode}))
    }

    pub fn chmod(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.unit(Command::Chmod, json!({"path": path, "mode": mode}))
    }

    /// Create (or truncate) `path` for writing and return its handle.
    pub fn create(&self, path: &str, mode: u32) -> ClientResult<u64> {
        self.value(Command::Create, json!({"path": path, "mode": mode}))
    }

    pub fn flush(&self, fh: u64) -> ClientResult<()> {
        self.unit(Command::Flush, json!({"fh": fh}))
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> ClientResult<()> {
        self.unit(Command::Fsync, json!({"fh": fh, "datasync": u8::from(datasync)}))
    }

    pub fn getattr(&self, path: &str) -> ClientResult<StatAttributes> {
        self.value(Command::Getattr, json!({"path": path}))
    }

    /// Create `target` as a hard link to `source`.
    pub fn link(&self, source: &str, target: &str) -> ClientResult<()> {
        self.unit(Command::Link, json!({"source": source, "target": target}))
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.unit(Command::Mkdir, json!({"path": path, "mode": mode}))
    }

    pub fn mknod(&self, path: &str, mode: u32, device: u64) -> ClientResult<()> {
        self.unit(
            Command::Mknod,
            json!({"filename": path, "mode": mode, "device": device}),
        )
    }

    pub fn open(&self, path: &str, flags: i32, mode: Option<u32>) -> ClientResult<u64> {
        self.value(
            Command::Open,
            json!({"path": path, "flags": flags, "mode": mode}),
        )
    }

    pub fn read(&self, fh: u64, offset: u64, size: u32) -> ClientResult<Vec<u8>> {
        self.raw(
            Command::Read,
            json!({"fh": fh, "offset": offset, "size": size}),
        )
    }

    pub fn readdir(&self, path: &str) -> ClientResult<Vec<String>> {
        self.value(Command::Readdir, json!({"path": path}))
    }

    pub fn readlink(&self, path: &str) -> ClientResult<Vec<u8>> {
        self.raw(Command::Readlink, json!({"path": path}))
    }

    pub fn release(&self, fh: u64) -> ClientResult<()> {
        self.unit(Command::Release, json!({"fh": fh}))
    }

    pub fn rename(&self, old: &str, new: &str) -> ClientResult<()> {
        self.unit(Command::Rename, json!({"old": old, "new": new}))
    }

    pub fn rmdir(&self, path: &str) -> ClientResult<()> {
        self.unit(Command::Rmdir, json!({"path": path}))
    }

    pub fn statfs(&self, path: &str) -> ClientResult<StatfsRecord> {
        self.value(Command::Statfs, json!({"path": path}))
    }

    /// Create `target` as a symlink whose content is `source`.
    pub fn symlink(&self, source: &str, target: &str) -> ClientResult<()> {
        self.unit(Command::Symlink, json!({"source": source, "target": target}))
    }

    pub fn truncate(&self, path: &str, length: u64) -> ClientResult<()> {
        self.unit(Command::Truncate, json!({"path": path, "length": length}))
    }

    pub fn unlink(&self, path: &str) -> ClientResult<()> {
        self.unit(Command::Unlink, json!({"path": path}))
    }

    /// Set access and modification times in seconds; `None` means now.
    pub fn utimens(&self, path: &str, times: Option<(f64, f64)>) -> ClientResult<()> {
        let times = times.map(|(atime, mtime)| [atime, mtime]);
        self.unit(Command::Utimens, json!({"path": path, "times": times}))
    }

    /// Write `data` at `offset` and return the number of bytes written.
    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> ClientResult<u64> {
        self.value(
            Command::Write,
            json!({"fh": fh, "offset": offset, "data": encode_bytes(data)}),
        )
    }

    pub fn xreaddir(&self, path: &str) -> ClientResult<DirectoryRecord> {
        self.value(Command::Xreaddir, json!({"path": path}))
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        if let Some(mut child) = lock(&self.child).take() {
            info!(pid = child.id(), "stopping remote agent");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
