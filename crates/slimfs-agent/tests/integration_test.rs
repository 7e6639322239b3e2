// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests for the agent request loop

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Command as Process, Stdio};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use slimfs_agent::{AgentServer, ExportRoot, READY_LINE};
use slimfs_client::{BootstrapMode, LaunchConfig, ProtocolClient};
use slimfs_proto::{
    read_response, write_request, ErrorRecord, Payload, Reply, COMMAND_WIDTH,
};

fn call<R: std::io::Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    command: &str,
    params: Value,
) -> Payload {
    write_request(writer, command, &Payload::Structured(params)).unwrap();
    read_response(reader).unwrap()
}

fn reply(payload: Payload) -> Result<Value, ErrorRecord> {
    let value = payload.into_structured().expect("structured reply");
    serde_json::from_value::<Reply>(value).unwrap().into_result()
}

#[test]
fn test_serve_over_socket_until_close() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();

    let (client, agent) = UnixStream::pair().unwrap();
    let root = ExportRoot::new(dir.path()).unwrap();
    let server_thread = thread::spawn(move || {
        let mut server = AgentServer::new(root);
        let mut reader = agent.try_clone().unwrap();
        let mut writer = agent;
        server.serve(&mut reader, &mut writer)
    });

    let mut reader = client.try_clone().unwrap();
    let mut writer = client;

    let fh = reply(call(
        &mut reader,
        &mut writer,
        "open",
        json!({"path": "/hello.txt", "flags": libc::O_RDONLY}),
    ))
    .unwrap();
    assert_eq!(fh, json!(1));

    let data = call(&mut reader, &mut writer, "read", json!({"fh": 1, "offset": 1, "size": 3}));
    assert_eq!(data, Payload::Raw(b"ell".to_vec()));

    let err = reply(call(&mut reader, &mut writer, "getattr", json!({"path": "/missing"})))
        .unwrap_err();
    assert_eq!(err, ErrorRecord::os(libc::ENOENT));

    // The loop keeps going after per-command failures.
    reply(call(&mut reader, &mut writer, "release", json!({"fh": 1}))).unwrap();

    drop(writer);
    drop(reader);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn test_malformed_request_gets_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let (client, agent) = UnixStream::pair().unwrap();
    let root = ExportRoot::new(dir.path()).unwrap();
    let server_thread = thread::spawn(move || {
        let mut server = AgentServer::new(root);
        let mut reader = agent.try_clone().unwrap();
        let mut writer = agent;
        server.serve(&mut reader, &mut writer)
    });

    let mut reader = client.try_clone().unwrap();
    let mut writer = client;

    // Structured flag set but the body is not JSON.
    let mut frame = b"mkdir".to_vec();
    frame.resize(COMMAND_WIDTH, 0);
    frame.extend_from_slice(&4u32.to_le_bytes());
    frame.push(1);
    frame.extend_from_slice(b"{{{{");
    writer.write_all(&frame).unwrap();

    let err = reply(read_response(&mut reader).unwrap()).unwrap_err();
    assert_eq!(err, ErrorRecord::protocol(libc::EINVAL));

    let ok = reply(call(&mut reader, &mut writer, "mkdir", json!({"path": "/d", "mode": 0o700})));
    assert_eq!(ok, Ok(Value::Null));
    assert!(dir.path().join("d").is_dir());

    drop(writer);
    drop(reader);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn test_binary_prints_ready_then_serves_stdio() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let mut child = Process::new(env!("CARGO_BIN_EXE_slimfs-agent"))
        .arg("--root")
        .arg(dir.path())
        .arg("--log-level")
        .arg("error")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line.trim_end(), READY_LINE);

    let names = reply(call(&mut stdout, &mut stdin, "readdir", json!({"path": "/"}))).unwrap();
    assert_eq!(names, json!([".", "..", "sub"]));

    drop(stdin);
    let status = child.wait().unwrap();
    assert!(status.success());
}

#[test]
fn test_uploaded_binary_serves_requests() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("export");
    std::fs::create_dir(&root).unwrap();

    // `sh -c '…' ssh <host> <command>` stands in for ssh running <command>.
    let config = LaunchConfig::builder(
        "localhost",
        BootstrapMode::Upload {
            agent_binary: PathBuf::from(env!("CARGO_BIN_EXE_slimfs-agent")),
        },
    )
    .ssh_program("sh")
    .ssh_args(["-c", "shift; exec sh -c \"$*\"", "ssh"])
    .export_root(root.display().to_string())
    .ready_timeout(Duration::from_secs(30))
    .build();

    let client = ProtocolClient::launch(&config).unwrap();
    assert!(client.statfs("/").unwrap().f_bsize > 0);
    client.mkdir("/made", 0o755).unwrap();
    assert!(root.join("made").is_dir());
    assert_eq!(client.readdir("/").unwrap(), [".", "..", "made"]);
}
