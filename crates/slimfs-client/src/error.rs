// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Errors surfaced by the protocol client

use slimfs_proto::{ErrorKind, ErrorRecord, FrameError};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The agent executed the call and it failed.
    #[error("remote {} (errno {code})", .kind.as_str())]
    Remote { kind: ErrorKind, code: i32 },
    #[error("transport failure: {0}")]
    Transport(FrameError),
    /// An earlier transport failure left the session unusable.
    #[error("session is broken by an earlier transport failure")]
    Broken,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("agent bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("no such entry")]
    NotFound,
}

impl ClientError {
    /// Kernel error number to report for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            ClientError::Remote { code, .. } => *code,
            ClientError::NotFound => libc::ENOENT,
            ClientError::Transport(_)
            | ClientError::Broken
            | ClientError::Protocol(_)
            | ClientError::Bootstrap(_) => libc::EIO,
        }
    }
}

impl From<ErrorRecord> for ClientError {
    fn from(record: ErrorRecord) -> Self {
        ClientError::Remote {
            kind: record.kind,
            code: record.code,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
