// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::process::Command;

fn mount_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_slimfs-mount"))
}

/// Agent binary built next to this crate's binaries, if present.
#[cfg(not(feature = "fuse"))]
fn agent_binary() -> Option<std::path::PathBuf> {
    let mount = std::path::Path::new(env!("CARGO_BIN_EXE_slimfs-mount"));
    let agent = mount.parent()?.join("slimfs-agent");
    agent.exists().then_some(agent)
}

#[test]
fn help_runs_without_mounting() {
    let output = mount_binary().arg("--help").output().expect("able to execute slimfs-mount");
    assert!(output.status.success(), "--help should succeed");
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("--agent-binary"));
    assert!(help.contains("--log-level"));
}

#[test]
fn missing_mount_point_is_a_usage_error() {
    let status = mount_binary().arg("box").status().unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn failed_bootstrap_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("slimfs.json");
    std::fs::write(
        &config,
        r#"{"launch": {"ssh_program": "false", "ready_timeout_ms": 2000}}"#,
    )
    .unwrap();

    let output = mount_binary()
        .args(["box", dir.path().to_str().unwrap(), "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot start agent"));
}

/// Config pointing the launcher at a local stand-in for ssh.
#[cfg(not(feature = "fuse"))]
fn fake_ssh_config(dir: &std::path::Path) -> std::path::PathBuf {
    let config = dir.join("slimfs.json");
    let json = serde_json::json!({
        "launch": {
            "ssh_program": "sh",
            "ssh_args": ["-c", "shift; exec sh -c \"$*\"", "ssh"],
            "ready_timeout_ms": 10000
        }
    });
    std::fs::write(&config, json.to_string()).unwrap();
    config
}

/// Run the mount binary against `dir` with the agent handed over by `mode`
/// (`--agent-path` or `--agent-binary`).
#[cfg(not(feature = "fuse"))]
fn assert_reaches_agent(mode: &str) {
    let Some(agent) = agent_binary() else {
        eprintln!("Skipping: slimfs-agent binary not built");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let config = fake_ssh_config(dir.path());

    let output = mount_binary()
        .args(["localhost", dir.path().to_str().unwrap(), "--config"])
        .arg(&config)
        .arg(mode)
        .arg(&agent)
        .args(["--root", dir.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("Remote agent reachable"));
}

// Without FUSE the binary only checks that the agent answers, then exits.
#[cfg(not(feature = "fuse"))]
#[test]
fn reaches_an_installed_agent_through_fake_ssh() {
    assert_reaches_agent("--agent-path");
}

#[cfg(not(feature = "fuse"))]
#[test]
fn reaches_an_uploaded_agent_through_fake_ssh() {
    assert_reaches_agent("--agent-binary");
}
