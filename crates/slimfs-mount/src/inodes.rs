// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Inode numbers handed to the kernel and the remote paths behind them

use std::collections::HashMap;

/// Inode of the mount root, fixed by FUSE.
pub const ROOT_INODE: u64 = 1;

/// Inode reported for listed entries the kernel has not looked up.
pub const UNKNOWN_INODE: u64 = 0xffff_ffff;

/// Longest single path component the adapter forwards.
pub const NAME_MAX: usize = 255;

#[derive(Debug)]
struct Node {
    path: String,
    /// Outstanding kernel lookups; the node is dropped when this reaches 0.
    lookups: u64,
}

/// Two-way map between inode numbers and remote paths.
///
/// Inode numbers are never reused within one mount.
#[derive(Debug)]
pub struct InodeTable {
    nodes: HashMap<u64, Node>,
    paths: HashMap<String, u64>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Join a directory path and one name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            nodes: HashMap::new(),
            paths: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        };
        table.nodes.insert(
            ROOT_INODE,
            Node {
                path: "/".to_string(),
                lookups: 1,
            },
        );
        table.paths.insert("/".to_string(), ROOT_INODE);
        table
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn path(&self, ino: u64) -> Option<&str> {
        self.nodes.get(&ino).map(|node| node.path.as_str())
    }

    /// Path of `name` inside directory `parent`.
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        self.path(parent).map(|dir| join(dir, name))
    }

    /// Inode to report for `path` in a directory listing. Listing never
    /// allocates, since the kernel sends no `forget` for listed entries.
    pub fn listed(&self, path: &str) -> u64 {
        self.paths.get(path).copied().unwrap_or(UNKNOWN_INODE)
    }

    fn allocate(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.paths.get(path) {
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.nodes.insert(
            ino,
            Node {
                path: path.to_string(),
                lookups: 0,
            },
        );
        self.paths.insert(path.to_string(), ino);
        ino
    }

    /// Inode for `path`, counting one kernel lookup.
    pub fn lookup(&mut self, path: &str) -> u64 {
        let ino = self.allocate(path);
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.lookups += 1;
        }
        ino
    }

    /// The kernel dropped `count` references to `ino`.
    pub fn forget(&mut self, ino: u64, count: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let Some(node) = self.nodes.get_mut(&ino) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(count);
        if node.lookups == 0 {
            if let Some(node) = self.nodes.remove(&ino) {
                if self.paths.get(&node.path) == Some(&ino) {
                    self.paths.remove(&node.path);
                }
            }
        }
    }

    /// `path` no longer exists. Its inode stays valid until forgotten,
    /// but a new entry at the same path gets a new inode.
    pub fn unlinked(&mut self, path: &str) {
        self.paths.remove(path);
    }

    /// Move `old` and every path below it to `new`.
    pub fn renamed(&mut self, old: &str, new: &str) {
        self.unlinked(new);
        let prefix = format!("{}/", old);
        let moved: Vec<(String, u64)> = self
            .paths
            .iter()
            .filter(|(path, _)| path.as_str() == old || path.starts_with(&prefix))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();

        for (path, ino) in moved {
            let target = format!("{}{}", new, &path[old.len()..]);
            self.paths.remove(&path);
            self.paths.insert(target.clone(), ino);
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.path = target;
            }
        }
    }
}
