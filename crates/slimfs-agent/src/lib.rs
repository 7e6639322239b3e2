// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! slimfs agent
//!
//! Runs on the remote host, reads framed requests from its input and
//! executes them against a confined directory tree. Exactly one request is
//! handled at a time.

pub mod error;
pub mod handles;
pub mod paths;
pub mod server;

pub use error::{AgentError, AgentResult};
pub use handles::HandleTable;
pub use paths::ExportRoot;
pub use server::AgentServer;

/// Line the agent prints on stdout once it is ready for frames.
pub const READY_LINE: &str = "ready";
