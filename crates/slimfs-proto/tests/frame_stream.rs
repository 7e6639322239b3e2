// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::io::{BufReader, Cursor};
use std::os::unix::net::UnixStream;
use std::thread;

use serde_json::json;
use slimfs_proto::*;

#[test]
fn test_back_to_back_frames_share_a_stream() {
    let mut wire = Vec::new();
    write_request(&mut wire, "open", &Payload::Structured(json!({"path": "/f", "flags": 0})))
        .unwrap();
    write_request(&mut wire, "read", &Payload::Structured(json!({"fh": 1, "offset": 0, "size": 4})))
        .unwrap();
    write_request(&mut wire, "statfs", &Payload::Raw(Vec::new())).unwrap();

    let mut cursor = Cursor::new(wire);
    let (first, payload) = read_request(&mut cursor).unwrap();
    assert_eq!(first, "open");
    assert_eq!(payload, Payload::Structured(json!({"path": "/f", "flags": 0})));

    let (second, _) = read_request(&mut cursor).unwrap();
    assert_eq!(second, "read");

    let (third, payload) = read_request(&mut cursor).unwrap();
    assert_eq!(third, "statfs");
    assert_eq!(payload, Payload::Raw(Vec::new()));

    assert!(matches!(read_request(&mut cursor), Err(FrameError::Closed)));
}

#[test]
fn test_structured_value_survives_socket_round_trip() {
    let (client, server) = UnixStream::pair().unwrap();

    let echo = thread::spawn(move || {
        let mut reader = BufReader::new(server.try_clone().unwrap());
        let mut writer = server;
        let (command, payload) = read_request(&mut reader).unwrap();
        assert_eq!(command, Command::Xreaddir.name());
        let reply = Reply::Ok(payload.into_structured().unwrap());
        write_response(&mut writer, &Payload::structured(&reply).unwrap()).unwrap();
    });

    let value = json!({
        "name": "caf\u{e9}",
        "nested": {"list": [1, 2.5, -3], "flag": true, "none": null}
    });
    let mut writer = client.try_clone().unwrap();
    let mut reader = BufReader::new(client);
    write_request(&mut writer, "xreaddir", &Payload::Structured(value.clone())).unwrap();

    let response = read_response(&mut reader).unwrap();
    let reply: Reply = serde_json::from_value(response.into_structured().unwrap()).unwrap();
    assert_eq!(reply.into_result().unwrap(), value);
    echo.join().unwrap();
}

#[test]
fn test_raw_bytes_are_not_interpreted() {
    let bytes = br#"{"ok": 1}"#.to_vec();
    let frame = encode_response(&Payload::Raw(bytes.clone())).unwrap();
    assert_eq!(frame[4], 0);
    assert_eq!(read_response(&mut frame.as_slice()).unwrap(), Payload::Raw(bytes));
}

#[test]
fn test_invalid_json_body_is_a_frame_error() {
    let mut frame = Vec::new();
    frame.extend_from_slice(&3u32.to_le_bytes());
    frame.push(1);
    frame.extend_from_slice(b"{no");
    assert!(matches!(read_response(&mut frame.as_slice()), Err(FrameError::Json(_))));
}

#[test]
fn test_non_utf8_command_is_rejected() {
    let mut frame = vec![0xff, 0xfe];
    frame.resize(COMMAND_WIDTH, 0);
    frame.extend_from_slice(&2u32.to_le_bytes());
    frame.push(0);
    frame.extend_from_slice(b"zz");
    write_request(&mut frame, "rmdir", &Payload::Structured(json!({"path": "/d"}))).unwrap();

    let mut cursor = Cursor::new(frame);
    let err = read_request(&mut cursor).unwrap_err();
    assert!(matches!(err, FrameError::InvalidCommand));
    assert!(err.is_recoverable());

    // The bad frame's body was consumed, so the stream stays aligned.
    let (command, _) = read_request(&mut cursor).unwrap();
    assert_eq!(command, "rmdir");
}
