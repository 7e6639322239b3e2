// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path-level filesystem operations over one agent connection
//!
//! [`SlimFs`] is what the FUSE adapter delegates to. It knows nothing
//! about inodes, so it can be driven directly in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slimfs_client::{CacheConfig, ClientResult, MetadataCache, ProtocolClient, TtlLru};
use slimfs_proto::{StatAttributes, StatfsRecord};
use tracing::{debug, trace};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum LinkKey {
    Readlink(String),
    Statfs(String),
}

#[derive(Clone, Debug)]
enum LinkValue {
    Target(Vec<u8>),
    Statfs(StatfsRecord),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SlimFs {
    client: Arc<ProtocolClient>,
    metadata: MetadataCache<Arc<ProtocolClient>>,
    links: Mutex<TtlLru<LinkKey, LinkValue>>,
    /// Path each open handle was opened under, for invalidation on write.
    open_paths: Mutex<HashMap<u64, String>>,
}

impl SlimFs {
    pub fn new(client: Arc<ProtocolClient>, metadata: CacheConfig, links: CacheConfig) -> Self {
        Self {
            metadata: MetadataCache::new(Arc::clone(&client), metadata),
            client,
            links: Mutex::new(TtlLru::new(links.ttl, links.capacity)),
            open_paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    /// Drop cached state about `path` after it was changed.
    fn changed(&self, path: &str) {
        self.metadata.invalidate(path);
        let mut links = lock(&self.links);
        links.remove(&LinkKey::Readlink(path.to_string()));
        links.remove(&LinkKey::Statfs(path.to_string()));
    }

    /// Drop cached state about `path` and everything below it.
    fn changed_tree(&self, path: &str) {
        self.metadata.invalidate_tree(path);
        let prefix = format!("{}/", path.trim_end_matches('/'));
        lock(&self.links).retain(|key, _| {
            let cached = match key {
                LinkKey::Readlink(cached) | LinkKey::Statfs(cached) => cached,
            };
            cached != path && !cached.starts_with(&prefix)
        });
    }

    fn changed_handle(&self, fh: u64) {
        let path = lock(&self.open_paths).get(&fh).cloned();
        if let Some(path) = path {
            self.changed(&path);
        }
    }

    fn remember_handle(&self, fh: u64, path: &str) {
        lock(&self.open_paths).insert(fh, path.to_string());
    }

    pub fn access(&self, path: &str, mode: u32) -> ClientResult<bool> {
        self.metadata.access(path, mode)
    }

    pub fn getattr(&self, path: &str) -> ClientResult<StatAttributes> {
        self.metadata.getattr(path)
    }

    /// Names in `path`, starting with `".."` and `"."`.
    pub fn readdir(&self, path: &str) -> ClientResult<Vec<String>> {
        self.metadata.readdir(path)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.client.chmod(path, mode)?;
        self.changed(path);
        Ok(())
    }

    pub fn create(&self, path: &str, mode: u32) -> ClientResult<u64> {
        let fh = self.client.create(path, mode)?;
        self.changed(path);
        self.remember_handle(fh, path);
        Ok(fh)
    }

    pub fn open(&self, path: &str, flags: i32) -> ClientResult<u64> {
        let fh = self.client.open(path, flags, None)?;
        if flags & (libc::O_TRUNC | libc::O_CREAT) != 0 {
            self.changed(path);
        }
        self.remember_handle(fh, path);
        Ok(fh)
    }

    pub fn read(&self, fh: u64, offset: u64, size: u32) -> ClientResult<Vec<u8>> {
        self.client.read(fh, offset, size)
    }

    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> ClientResult<u64> {
        let written = self.client.write(fh, offset, data)?;
        self.changed_handle(fh);
        Ok(written)
    }

    pub fn flush(&self, fh: u64) -> ClientResult<()> {
        self.client.flush(fh)
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> ClientResult<()> {
        self.client.fsync(fh, datasync)
    }

    pub fn release(&self, fh: u64) -> ClientResult<()> {
        let result = self.client.release(fh);
        lock(&self.open_paths).remove(&fh);
        result
    }

    pub fn link(&self, source: &str, target: &str) -> ClientResult<()> {
        self.client.link(source, target)?;
        self.changed(target);
        // The source's link count changed too.
        self.changed(source);
        Ok(())
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> ClientResult<()> {
        self.client.mkdir(path, mode)?;
        self.changed(path);
        Ok(())
    }

    pub fn mknod(&self, path: &str, mode: u32, device: u64) -> ClientResult<()> {
        self.client.mknod(path, mode, device)?;
        self.changed(path);
        Ok(())
    }

    pub fn readlink(&self, path: &str) -> ClientResult<Vec<u8>> {
        let key = LinkKey::Readlink(path.to_string());
        if let Some(LinkValue::Target(target)) = lock(&self.links).get(&key) {
            trace!(path, "readlink cache hit");
            return Ok(target.clone());
        }
        let target = self.client.readlink(path)?;
        lock(&self.links).insert(key, LinkValue::Target(target.clone()));
        Ok(target)
    }

    pub fn rename(&self, old: &str, new: &str) -> ClientResult<()> {
        self.client.rename(old, new)?;
        debug!(old, new, "renamed");
        self.changed_tree(old);
        self.changed_tree(new);
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> ClientResult<()> {
        self.client.rmdir(path)?;
        self.changed_tree(path);
        Ok(())
    }

    pub fn statfs(&self, path: &str) -> ClientResult<StatfsRecord> {
        let key = LinkKey::Statfs(path.to_string());
        if let Some(LinkValue::Statfs(record)) = lock(&self.links).get(&key) {
            trace!(path, "statfs cache hit");
            return Ok(record.clone());
        }
        let record = self.client.statfs(path)?;
        lock(&self.links).insert(key, LinkValue::Statfs(record.clone()));
        Ok(record)
    }

    /// Create `target` as a symlink whose content is `source`.
    pub fn symlink(&self, source: &str, target: &str) -> ClientResult<()> {
        self.client.symlink(source, target)?;
        self.changed(target);
        Ok(())
    }

    pub fn truncate(&self, path: &str, length: u64) -> ClientResult<()> {
        self.client.truncate(path, length)?;
        self.changed(path);
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> ClientResult<()> {
        self.client.unlink(path)?;
        self.changed(path);
        Ok(())
    }

    pub fn utimens(&self, path: &str, times: Option<(f64, f64)>) -> ClientResult<()> {
        self.client.utimens(path, times)?;
        self.changed(path);
        Ok(())
    }
}
