// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Exclusive owner of the request/response stream

use std::io::{Read, Write};

use slimfs_proto::{read_response, write_request, FrameError, Payload};
use tracing::{error, trace};

use crate::error::{ClientError, ClientResult};

/// One request/response channel to an agent.
///
/// The session owns both directions of the stream, so a request and its
/// response are always paired. After a transport failure the stream
/// position is unknown and the session refuses further calls.
pub struct Session {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    broken: bool,
}

impl Session {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            broken: false,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send one request and wait for its response.
    pub fn call(&mut self, command: &str, payload: &Payload) -> ClientResult<Payload> {
        if self.broken {
            return Err(ClientError::Broken);
        }

        trace!(command, "sending request");
        write_request(&mut self.writer, command, payload).map_err(|err| self.fail(err))?;
        read_response(&mut self.reader).map_err(|err| self.fail(err))
    }

    fn fail(&mut self, err: FrameError) -> ClientError {
        match err {
            // Encoding failures happen before any byte is written; bad JSON
            // in a response is detected after its body was consumed.
            FrameError::CommandTooLong(_) | FrameError::InvalidCommand | FrameError::Json(_) => {
                ClientError::Protocol(err.to_string())
            }
            FrameError::Closed
            | FrameError::Truncated
            | FrameError::PayloadTooLarge(_)
            | FrameError::Io(_) => {
                error!(error = %err, "transport failed, session is now unusable");
                self.broken = true;
                ClientError::Transport(err)
            }
        }
    }
}
