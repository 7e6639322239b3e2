// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! slimfs protocol: framing, command vocabulary and message records
//!
//! This crate is shared by the mount-side client and the remote agent.
//! It does no I/O beyond reading and writing frames on a caller-supplied
//! stream.

pub mod command;
pub mod frame;
pub mod messages;
pub mod params;

pub use command::Command;
pub use frame::{
    encode_request, encode_response, read_request, read_response, write_request,
    write_response, FrameError, Payload, COMMAND_WIDTH, MAX_PAYLOAD_LEN,
};
pub use messages::{
    DirectoryRecord, EntryRecord, ErrorKind, ErrorRecord, Reply, StatAttributes, StatfsRecord,
    ACCESS_EXEC, ACCESS_READ, ACCESS_WRITE,
};
pub use params::{encode_bytes, ParamError, Params};
