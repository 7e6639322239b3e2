// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error type of the agent's command handlers

use std::io;

use slimfs_proto::{ErrorRecord, ParamError};

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("io error: {0}")]
    Os(#[from] io::Error),
    #[error("bad parameters: {0}")]
    Param(#[from] ParamError),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("no open file with handle {0}")]
    BadHandle(u64),
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("reply of {0} bytes does not fit a frame")]
    ReplyTooLarge(u64),
}

impl From<nix::errno::Errno> for AgentError {
    fn from(errno: nix::errno::Errno) -> Self {
        AgentError::Os(io::Error::from_raw_os_error(errno as i32))
    }
}

impl AgentError {
    /// Record sent back to the client in place of a result.
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            AgentError::Os(err) => ErrorRecord::os(err.raw_os_error().unwrap_or(libc::EIO)),
            AgentError::BadHandle(_) => ErrorRecord::os(libc::EBADF),
            AgentError::Encode(_) => ErrorRecord::os(libc::EIO),
            AgentError::ReplyTooLarge(_) => ErrorRecord::os(libc::EFBIG),
            AgentError::UnknownCommand(_) => ErrorRecord::protocol(libc::ENOSYS),
            AgentError::Param(_) | AgentError::Malformed(_) => ErrorRecord::protocol(libc::EINVAL),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
