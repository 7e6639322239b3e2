// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Starting the agent on the remote host over ssh

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

/// Line the agent prints once it accepts frames.
pub const READY_LINE: &str = "ready";

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How the agent executable reaches the remote host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Stream a local agent binary through the remote shell into a temp
    /// file and run it from there. The agent deletes the file on start.
    Upload { agent_binary: PathBuf },
    /// Run an agent already installed at this remote path.
    Installed { agent_path: String },
}

/// Everything needed to start one agent.
#[derive(Clone, Debug)]
pub struct LaunchConfig {
    host: String,
    ssh_program: String,
    ssh_args: Vec<String>,
    bootstrap: BootstrapMode,
    export_root: String,
    ready_timeout: Duration,
}

impl LaunchConfig {
    /// Start building a launch description for `host`.
    pub fn builder(host: impl Into<String>, bootstrap: BootstrapMode) -> LaunchConfigBuilder {
        LaunchConfigBuilder {
            host: host.into(),
            ssh_program: "ssh".to_string(),
            ssh_args: Vec::new(),
            bootstrap,
            export_root: ".".to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn bootstrap(&self) -> &BootstrapMode {
        &self.bootstrap
    }

    pub fn export_root(&self) -> &str {
        &self.export_root
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    /// Command line of the local ssh process. `upload_len` is the size of
    /// the binary streamed on stdin in upload mode.
    fn ssh_command(&self, upload_len: usize) -> Command {
        let mut command = Command::new(&self.ssh_program);
        command.args(&self.ssh_args).arg(&self.host);
        match &self.bootstrap {
            BootstrapMode::Upload { .. } => {
                command.arg(upload_command(upload_len, &self.export_root));
            }
            BootstrapMode::Installed { agent_path } => {
                command.arg(format!(
                    "{} --root {}",
                    shell_quote(agent_path),
                    shell_quote(&self.export_root)
                ));
            }
        }
        command
    }
}

/// Builder for [`LaunchConfig`].
pub struct LaunchConfigBuilder {
    host: String,
    ssh_program: String,
    ssh_args: Vec<String>,
    bootstrap: BootstrapMode,
    export_root: String,
    ready_timeout: Duration,
}

impl LaunchConfigBuilder {
    /// Program used in place of `ssh`.
    pub fn ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    /// Add one argument placed before the host name.
    pub fn ssh_arg(mut self, arg: impl Into<String>) -> Self {
        self.ssh_args.push(arg.into());
        self
    }

    /// Replace the arguments placed before the host name.
    pub fn ssh_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ssh_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Remote directory to export (defaults to the login directory).
    pub fn export_root(mut self, root: impl Into<String>) -> Self {
        self.export_root = root.into();
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn build(self) -> LaunchConfig {
        LaunchConfig {
            host: self.host,
            ssh_program: self.ssh_program,
            ssh_args: self.ssh_args,
            bootstrap: self.bootstrap,
            export_root: self.export_root,
            ready_timeout: self.ready_timeout,
        }
    }
}

/// A started agent whose stdout already delivered the ready line.
pub struct LaunchedAgent {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: BufReader<ChildStdout>,
}

/// Spawn ssh, hand the agent over and wait until it reports ready.
///
/// Any failure kills the ssh process; there is no retry.
pub fn launch(config: &LaunchConfig) -> ClientResult<LaunchedAgent> {
    let binary = match &config.bootstrap {
        BootstrapMode::Upload { agent_binary } => Some(fs::read(agent_binary).map_err(|err| {
            ClientError::Bootstrap(format!("cannot read {}: {}", agent_binary.display(), err))
        })?),
        BootstrapMode::Installed { .. } => None,
    };
    let mut command = config.ssh_command(binary.as_ref().map_or(0, Vec::len));
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    info!(host = %config.host, root = %config.export_root, "starting remote agent");

    let mut child = command
        .spawn()
        .map_err(|err| ClientError::Bootstrap(format!("cannot run {}: {}", config.ssh_program, err)))?;

    match start_agent(config, &mut child, binary.as_deref()) {
        Ok((stdin, stdout)) => Ok(LaunchedAgent {
            child,
            stdin,
            stdout,
        }),
        Err(err) => {
            warn!(error = %err, "agent bootstrap failed, killing ssh");
            let _ = child.kill();
            let _ = child.wait();
            Err(err)
        }
    }
}

fn start_agent(
    config: &LaunchConfig,
    child: &mut Child,
    binary: Option<&[u8]>,
) -> ClientResult<(ChildStdin, BufReader<ChildStdout>)> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ClientError::Bootstrap("ssh stdin is not piped".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClientError::Bootstrap("ssh stdout is not piped".into()))?;

    if let Some(binary) = binary {
        debug!(bytes = binary.len(), "uploading agent binary");
        stdin
            .write_all(binary)
            .and_then(|()| stdin.flush())
            .map_err(|err| ClientError::Bootstrap(format!("upload failed: {}", err)))?;
    }

    let stdout = wait_for_ready(BufReader::new(stdout), config.ready_timeout)?;
    info!(host = %config.host, "remote agent is ready");
    Ok((stdin, stdout))
}

/// Remote command of upload mode: copy exactly `len` bytes of stdin into a
/// fresh temp file, then replace the shell with the agent.
///
/// The script travels on the command line. A shell reading its script from
/// stdin may buffer past the script and swallow the binary.
fn upload_command(len: usize, export_root: &str) -> String {
    let script = format!(
        "f=$(mktemp) && head -c {} >\"$f\" && chmod 700 \"$f\" && exec \"$f\" --root {} --cleanup-executable",
        len,
        shell_quote(export_root)
    );
    format!("sh -c {}", shell_quote(&script))
}

/// Read lines until the agent reports ready.
///
/// Lines before it (login banners and the like) are skipped. EOF or the
/// timeout elapsing first is a bootstrap failure. The reader is handed
/// back positioned right after the ready line.
pub fn wait_for_ready<R>(reader: R, timeout: Duration) -> ClientResult<R>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut reader = reader;
        let mut line = String::new();
        let outcome = loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break Err("agent exited before it was ready".to_string()),
                Ok(_) if line.trim_end() == READY_LINE => break Ok(reader),
                Ok(_) => debug!(line = line.trim_end(), "skipping output before ready"),
                Err(err) => break Err(format!("reading agent output failed: {}", err)),
            }
        };
        let _ = tx.send(outcome);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(reader)) => Ok(reader),
        Ok(Err(message)) => Err(ClientError::Bootstrap(message)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ClientError::Bootstrap(format!(
            "agent not ready after {:?}",
            timeout
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(ClientError::Bootstrap("readiness watcher stopped".into()))
        }
    }
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
