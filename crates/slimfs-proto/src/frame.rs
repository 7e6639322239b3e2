// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Length-prefixed framing shared by the mount client and the remote agent
//!
//! Request layout:
//!
//! ```text
//! [command: 16 bytes, NUL padded][payload length: u32 LE][structured: u8][payload]
//! ```
//!
//! Responses use the same layout without the command field. There are no
//! delimiters and no request IDs, so a stream must never carry interleaved
//! frames from two writers.

use std::borrow::Cow;
use std::io::{self, Read, Write};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Width of the NUL-padded command field carried by requests.
pub const COMMAND_WIDTH: usize = 16;

/// Largest payload a reader accepts before treating the stream as corrupt.
pub const MAX_PAYLOAD_LEN: u32 = 256 * 1024 * 1024;

const LENGTH_WIDTH: usize = 4;

/// Size of a response header (length + structured flag).
pub const RESPONSE_HEADER_LEN: usize = LENGTH_WIDTH + 1;

/// Size of a request header (command + length + structured flag).
pub const REQUEST_HEADER_LEN: usize = COMMAND_WIDTH + RESPONSE_HEADER_LEN;

/// Framing failure.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("channel closed")]
    Closed,
    #[error("channel closed in the middle of a frame")]
    Truncated,
    #[error("command name '{0}' does not fit the command field")]
    CommandTooLong(String),
    #[error("command field is not valid UTF-8")]
    InvalidCommand,
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(u64),
    #[error("invalid structured payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the failing frame was consumed whole, so the next frame can
    /// still be read.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::InvalidCommand | FrameError::Json(_))
    }
}

/// Body of a frame: opaque bytes or a JSON value.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Raw(Vec<u8>),
    Structured(Value),
}

impl Payload {
    /// Serialize any value into a structured payload.
    pub fn structured<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }

    pub fn into_raw(self) -> Option<Vec<u8>> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            Payload::Structured(_) => None,
        }
    }

    pub fn into_structured(self) -> Option<Value> {
        match self {
            Payload::Structured(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    fn to_wire(&self) -> Result<(Cow<'_, [u8]>, bool), FrameError> {
        match self {
            Payload::Raw(bytes) => Ok((Cow::Borrowed(bytes.as_slice()), false)),
            Payload::Structured(value) => Ok((Cow::Owned(serde_json::to_vec(value)?), true)),
        }
    }

    fn from_wire(body: Vec<u8>, structured: bool) -> Result<Self, FrameError> {
        if !structured {
            return Ok(Payload::Raw(body));
        }
        // An empty structured body is a null result, not an error.
        if body.is_empty() {
            return Ok(Payload::Structured(Value::Null));
        }
        Ok(Payload::Structured(serde_json::from_slice(&body)?))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(bytes)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// Encode a request frame for `command`.
pub fn encode_request(command: &str, payload: &Payload) -> Result<Vec<u8>, FrameError> {
    let name = command.as_bytes();
    if name.len() > COMMAND_WIDTH {
        return Err(FrameError::CommandTooLong(command.to_string()));
    }

    let (body, structured) = payload.to_wire()?;
    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + body.len());
    frame.extend_from_slice(name);
    frame.resize(COMMAND_WIDTH, 0);
    push_length_and_flag(&mut frame, body.len(), structured)?;
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Encode a response frame.
pub fn encode_response(payload: &Payload) -> Result<Vec<u8>, FrameError> {
    let (body, structured) = payload.to_wire()?;
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + body.len());
    push_length_and_flag(&mut frame, body.len(), structured)?;
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one request frame and flush.
pub fn write_request<W: Write>(
    writer: &mut W,
    command: &str,
    payload: &Payload,
) -> Result<(), FrameError> {
    let frame = encode_request(command, payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Write one response frame and flush.
pub fn write_response<W: Write>(writer: &mut W, payload: &Payload) -> Result<(), FrameError> {
    let frame = encode_response(payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one request frame, returning the command name and its payload.
///
/// Returns [`FrameError::Closed`] when the stream ends cleanly before a new
/// frame starts. The body is always consumed before the command field or
/// the payload is validated.
pub fn read_request<R: Read>(reader: &mut R) -> Result<(String, Payload), FrameError> {
    let mut header = [0u8; REQUEST_HEADER_LEN];
    read_header(reader, &mut header)?;
    let (body, structured) = read_body(reader, &header[COMMAND_WIDTH..])?;

    let field = &header[..COMMAND_WIDTH];
    let name_len = field.iter().position(|b| *b == 0).unwrap_or(COMMAND_WIDTH);
    let command = std::str::from_utf8(&field[..name_len])
        .map_err(|_| FrameError::InvalidCommand)?
        .to_string();

    let payload = Payload::from_wire(body, structured)?;
    Ok((command, payload))
}

/// Read one response frame.
pub fn read_response<R: Read>(reader: &mut R) -> Result<Payload, FrameError> {
    let mut header = [0u8; RESPONSE_HEADER_LEN];
    read_header(reader, &mut header)?;
    let (body, structured) = read_body(reader, &header)?;
    Payload::from_wire(body, structured)
}

fn push_length_and_flag(
    frame: &mut Vec<u8>,
    len: usize,
    structured: bool,
) -> Result<(), FrameError> {
    let len = u32::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or(FrameError::PayloadTooLarge(len as u64))?;
    frame.extend_from_slice(&len.to_le_bytes());
    frame.push(u8::from(structured));
    Ok(())
}

fn read_header<R: Read>(reader: &mut R, header: &mut [u8]) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Err(FrameError::Closed),
            Ok(0) => return Err(FrameError::Truncated),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// `tail` is the length + flag part of a header.
fn read_body<R: Read>(reader: &mut R, tail: &[u8]) -> Result<(Vec<u8>, bool), FrameError> {
    let mut len_bytes = [0u8; LENGTH_WIDTH];
    len_bytes.copy_from_slice(&tail[..LENGTH_WIDTH]);
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(len as u64));
    }
    let structured = tail[LENGTH_WIDTH] != 0;

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(err)
        }
    })?;

    Ok((body, structured))
}
