// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Confinement of client paths to the exported tree

use std::io;
use std::path::{Component, Path, PathBuf};

/// Directory the agent serves. Client paths are interpreted relative to it.
#[derive(Clone, Debug)]
pub struct ExportRoot {
    root: PathBuf,
}

impl ExportRoot {
    /// The root must exist; it is canonicalized once so that resolved paths
    /// are absolute.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Map a client path onto the export. Resolution is lexical: `..`
    /// never climbs above the root, and a leading `/` names the root.
    pub fn resolve(&self, client_path: &str) -> PathBuf {
        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in Path::new(client_path).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::ParentDir => {
                    parts.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        let mut resolved = self.root.clone();
        resolved.extend(parts);
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_stay_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = ExportRoot::new(dir.path()).unwrap();
        let base = root.path().to_path_buf();

        assert_eq!(root.resolve("/"), base);
        assert_eq!(root.resolve(""), base);
        assert_eq!(root.resolve("/a/b"), base.join("a/b"));
        assert_eq!(root.resolve("a/./b/"), base.join("a/b"));
        assert_eq!(root.resolve("/a/../b"), base.join("b"));
        assert_eq!(root.resolve("/../../etc/passwd"), base.join("etc/passwd"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ExportRoot::new(dir.path().join("nope")).is_err());
    }
}
