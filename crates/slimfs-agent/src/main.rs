// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! slimfs agent executable

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use slimfs_agent::{AgentServer, ExportRoot, READY_LINE};
use slimfs_logging::CliLoggingArgs;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "slimfs-agent", about = "Serve slimfs requests on stdin/stdout")]
struct Args {
    /// Directory exported to the client
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Delete this executable once it is running
    #[arg(long)]
    cleanup_executable: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn remove_own_executable() {
    match std::env::current_exe().and_then(std::fs::remove_file) {
        Ok(()) => info!("removed uploaded executable"),
        Err(err) => warn!(error = %err, "could not remove own executable"),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    // stdout carries frames, so logs go to stderr or a file.
    args.logging.init("slimfs-agent")?;

    if args.cleanup_executable {
        remove_own_executable();
    }

    let root = ExportRoot::new(&args.root)
        .with_context(|| format!("cannot export {}", args.root.display()))?;
    let mut server = AgentServer::new(root);

    let mut reader = io::stdin().lock();
    let mut writer = io::stdout().lock();
    writeln!(writer, "{}", READY_LINE)?;
    writer.flush()?;

    server.serve(&mut reader, &mut writer).context("channel to client failed")?;
    Ok(())
}
