// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount configuration file (JSON)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use slimfs_client::{BootstrapMode, CacheConfig, LaunchConfig};
use slimfs_logging::LoggingConfig;

/// How the agent gets onto the remote host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapConfig {
    Upload { agent_binary: PathBuf },
    Installed { agent_path: String },
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig::Installed {
            agent_path: "slimfs-agent".to_string(),
        }
    }
}

impl From<BootstrapConfig> for BootstrapMode {
    fn from(config: BootstrapConfig) -> Self {
        match config {
            BootstrapConfig::Upload { agent_binary } => BootstrapMode::Upload { agent_binary },
            BootstrapConfig::Installed { agent_path } => BootstrapMode::Installed { agent_path },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSection {
    pub ssh_program: String,
    pub ssh_args: Vec<String>,
    pub bootstrap: BootstrapConfig,
    /// Remote directory to export; `.` is the ssh login directory.
    pub export_root: String,
    pub ready_timeout_ms: u64,
}

impl Default for LaunchSection {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_args: Vec::new(),
            bootstrap: BootstrapConfig::default(),
            export_root: ".".to_string(),
            ready_timeout_ms: 30_000,
        }
    }
}

impl LaunchSection {
    pub fn to_launch_config(&self, host: &str) -> LaunchConfig {
        LaunchConfig::builder(host, self.bootstrap.clone().into())
            .ssh_program(self.ssh_program.clone())
            .ssh_args(self.ssh_args.iter().cloned())
            .export_root(self.export_root.clone())
            .ready_timeout(Duration::from_millis(self.ready_timeout_ms))
            .build()
    }
}

/// Size and lifetime of one TTL/LRU cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSection {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl CacheSection {
    pub fn to_cache_config(self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(self.ttl_ms),
            capacity: self.capacity,
        }
    }
}

fn default_metadata_cache() -> CacheSection {
    CacheSection {
        ttl_ms: 60_000,
        capacity: 32,
    }
}

fn default_link_cache() -> CacheSection {
    CacheSection {
        ttl_ms: 600_000,
        capacity: 1024,
    }
}

/// Everything `slimfs-mount` reads from `--config`. Every field has a
/// default, so `{}` is a valid file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub launch: LaunchSection,
    /// Directory records answering `access`, `getattr` and `readdir`.
    pub metadata_cache: CacheSection,
    /// `readlink` and `statfs` results.
    pub link_cache: CacheSection,
    pub logging: LoggingConfig,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            launch: LaunchSection::default(),
            metadata_cache: default_metadata_cache(),
            link_cache: default_link_cache(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(config_path: Option<&Path>) -> Result<MountConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: MountConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(MountConfig::default()),
    }
}
