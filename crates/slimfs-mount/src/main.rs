// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! slimfs mount host: mounts a directory of a remote ssh host

use anyhow::{Context, Result};
use clap::Parser;
use slimfs_client::ProtocolClient;
use slimfs_logging::{CliLogLevel, CliLoggingArgs};
use slimfs_mount::{load_config, BootstrapConfig, MountConfig, SlimFs};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "slimfs-mount", about = "Mount a remote directory over ssh through FUSE")]
struct Args {
    /// Remote host, as passed to ssh
    host: String,

    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upload this local agent binary over ssh for the lifetime of the mount
    #[arg(long, conflicts_with = "agent_path")]
    agent_binary: Option<PathBuf>,

    /// Run the agent already installed at this remote path
    #[arg(long)]
    agent_path: Option<String>,

    /// Remote directory to export (default: the ssh login directory)
    #[arg(long)]
    root: Option<String>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

/// Command-line flags win over the config file.
fn apply_args(config: &mut MountConfig, args: &Args) {
    if let Some(agent_binary) = &args.agent_binary {
        config.launch.bootstrap = BootstrapConfig::Upload {
            agent_binary: agent_binary.clone(),
        };
    }
    if let Some(agent_path) = &args.agent_path {
        config.launch.bootstrap = BootstrapConfig::Installed {
            agent_path: agent_path.clone(),
        };
    }
    if let Some(root) = &args.root {
        config.launch.export_root = root.clone();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    apply_args(&mut config, &args);

    args.logging
        .clone()
        .merged_with(&config.logging)
        .init_with_default_level("slimfs-mount", CliLogLevel::Debug)?;

    info!("Starting slimfs mount host");
    info!("Mount point: {}", args.mount_point.display());
    info!("Configuration loaded: {:?}", config);

    let launch = config.launch.to_launch_config(&args.host);
    let client = ProtocolClient::launch(&launch)
        .with_context(|| format!("cannot start agent on {}", args.host))?;
    let fs = SlimFs::new(
        Arc::new(client),
        config.metadata_cache.to_cache_config(),
        config.link_cache.to_cache_config(),
    );

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        let filesystem = slimfs_mount::SlimFuse::new(fs);

        let mut mount_options = vec![
            fuser::MountOption::FSName(format!("slimfs:{}", args.host)),
            fuser::MountOption::Subtype("slimfs".to_string()),
        ];

        if args.allow_other {
            mount_options.push(fuser::MountOption::AllowOther);
        }

        if args.auto_unmount {
            mount_options.push(fuser::MountOption::AutoUnmount);
        }

        info!("Mounting filesystem...");
        let session = fuser::spawn_mount2(filesystem, &args.mount_point, &mount_options)?;
        info!("slimfs mounted; blocking until unmount");
        session.join();
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        let stats = fs.statfs("/")?;
        tracing::warn!("FUSE support not compiled in. This binary is for testing only.");
        info!(
            blocks = stats.f_blocks,
            free = stats.f_bavail,
            "Remote agent reachable"
        );
        info!("To enable FUSE support, compile with: cargo build --features fuse");
    }

    Ok(())
}
