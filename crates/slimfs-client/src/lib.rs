// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client side of the slimfs protocol.
//!
//! [`ProtocolClient`] talks to an agent over any byte stream pair, usually
//! the stdin/stdout of an ssh process started by [`launcher::launch`].
//! [`MetadataCache`] answers `access`, `getattr` and `readdir` from
//! directory records fetched with one `xreaddir` per directory.

pub mod cache;
pub mod client;
pub mod error;
pub mod launcher;
pub mod metadata;
pub mod session;

pub use cache::TtlLru;
pub use client::ProtocolClient;
pub use error::{ClientError, ClientResult};
pub use launcher::{BootstrapMode, LaunchConfig, LaunchConfigBuilder};
pub use metadata::{split_path, CacheConfig, DirectorySource, MetadataCache};
pub use session::Session;
