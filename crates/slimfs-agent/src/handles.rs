// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open file handles owned by the agent

use std::collections::HashMap;
use std::fs::File;

use crate::error::{AgentError, AgentResult};

/// Maps protocol handle IDs to open files.
///
/// IDs start at 1 and are never reused while the table lives, so a stale
/// ID held by the client can never reach a newer file.
#[derive(Debug)]
pub struct HandleTable {
    next_id: u64,
    files: HashMap<u64, File>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            files: HashMap::new(),
        }
    }

    pub fn insert(&mut self, file: File) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.files.insert(id, file);
        id
    }

    pub fn get_mut(&mut self, id: u64) -> AgentResult<&mut File> {
        self.files.get_mut(&id).ok_or(AgentError::BadHandle(id))
    }

    /// Remove and return the file; dropping it closes the descriptor.
    pub fn remove(&mut self, id: u64) -> AgentResult<File> {
        self.files.remove(&id).ok_or(AgentError::BadHandle(id))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
