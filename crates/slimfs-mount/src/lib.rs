// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! slimfs mount host
//!
//! Starts an agent on a remote host, then exposes its directory tree
//! through FUSE. [`ops::SlimFs`] holds the path-level semantics and the
//! caches; [`adapter::SlimFuse`] (Linux with the `fuse` feature) turns
//! kernel requests into `SlimFs` calls.

#[cfg(all(feature = "fuse", target_os = "linux"))]
pub mod adapter;
pub mod config;
pub mod inodes;
pub mod ops;

#[cfg(all(feature = "fuse", target_os = "linux"))]
pub use adapter::SlimFuse;
pub use config::{load_config, BootstrapConfig, MountConfig};
pub use inodes::InodeTable;
pub use ops::SlimFs;
