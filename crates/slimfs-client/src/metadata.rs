// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory-granular metadata cache in front of the protocol client
//!
//! A miss on any path fetches the whole parent directory with one
//! `xreaddir`, so a `ls -l` costs one round trip instead of one per entry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use slimfs_proto::{DirectoryRecord, EntryRecord, StatAttributes};
use tracing::trace;

use crate::cache::TtlLru;
use crate::client::ProtocolClient;
use crate::error::{ClientError, ClientResult};

/// Where directory records come from.
#[cfg_attr(test, mockall::automock)]
pub trait DirectorySource: Send + Sync {
    fn xreaddir(&self, path: &str) -> ClientResult<DirectoryRecord>;
}

impl DirectorySource for ProtocolClient {
    fn xreaddir(&self, path: &str) -> ClientResult<DirectoryRecord> {
        ProtocolClient::xreaddir(self, path)
    }
}

impl<T: DirectorySource + ?Sized> DirectorySource for Arc<T> {
    fn xreaddir(&self, path: &str) -> ClientResult<DirectoryRecord> {
        (**self).xreaddir(path)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 32,
        }
    }
}

/// Split a path into the directory whose record describes it and the name
/// inside that record. A path that denotes a directory itself (the root,
/// or anything with a trailing slash) maps to that directory's `"."`.
pub fn split_path(path: &str) -> (String, String) {
    if path.is_empty() || path.ends_with('/') {
        return (directory_key(path), ".".to_string());
    }
    match path.rsplit_once('/') {
        Some((dir, name)) => (directory_key(dir), name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

/// Canonical cache key of a directory path.
fn directory_key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Answers `access`, `getattr` and `readdir` from cached directory records.
pub struct MetadataCache<S> {
    source: S,
    records: Mutex<TtlLru<String, DirectoryRecord>>,
}

impl<S: DirectorySource> MetadataCache<S> {
    pub fn new(source: S, config: CacheConfig) -> Self {
        Self {
            source,
            records: Mutex::new(TtlLru::new(config.ttl, config.capacity)),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn records(&self) -> MutexGuard<'_, TtlLru<String, DirectoryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the record of `dir`, fetching it on a miss. The lock is
    /// held across the fetch so concurrent misses cost one round trip.
    fn with_record<T>(
        &self,
        dir: &str,
        f: impl FnOnce(&DirectoryRecord) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let mut records = self.records();
        let now = Instant::now();
        if let Some(record) = records.get_at(dir, now) {
            trace!(dir, "metadata cache hit");
            return f(record);
        }

        trace!(dir, "metadata cache miss");
        let record = self.source.xreaddir(dir)?;
        let result = f(&record);
        records.insert_at(dir.to_string(), record, now);
        result
    }

    fn with_entry<T>(&self, path: &str, f: impl FnOnce(&EntryRecord) -> T) -> ClientResult<T> {
        let (dir, name) = split_path(path);
        self.with_record(&dir, |record| {
            record.get(&name).map(f).ok_or(ClientError::NotFound)
        })
    }

    /// Whether the agent holds every bit of `mode`; mode 0 tests existence.
    pub fn access(&self, path: &str, mode: u32) -> ClientResult<bool> {
        self.with_entry(path, |entry| entry.allows(mode))
    }

    pub fn getattr(&self, path: &str) -> ClientResult<StatAttributes> {
        self.with_entry(path, |entry| entry.attributes.clone())
    }

    /// Names in directory `path`: `".."` followed by the record's keys,
    /// which include `"."`.
    pub fn readdir(&self, path: &str) -> ClientResult<Vec<String>> {
        let dir = directory_key(path);
        self.with_record(&dir, |record| {
            let mut names = Vec::with_capacity(record.len() + 1);
            names.push("..".to_string());
            names.extend(record.keys().cloned());
            Ok(names)
        })
    }

    /// Forget what is cached about `path`: the record of its parent
    /// directory and, if `path` is a directory, its own record.
    pub fn invalidate(&self, path: &str) {
        let (parent, _) = split_path(path);
        let own = directory_key(path);
        let mut records = self.records();
        records.remove(parent.as_str());
        records.remove(own.as_str());
        trace!(path, "metadata invalidated");
    }

    /// Like [`invalidate`](Self::invalidate), and also forget every
    /// directory below `path`. Used when a directory moves or disappears.
    pub fn invalidate_tree(&self, path: &str) {
        let (parent, _) = split_path(path);
        let own = directory_key(path);
        let prefix = if own == "/" { own.clone() } else { format!("{}/", own) };
        self.records()
            .retain(|dir, _| *dir != parent && *dir != own && !dir.starts_with(&prefix));
        trace!(path, "metadata subtree invalidated");
    }

    pub fn clear(&self) {
        self.records().clear();
    }
}
