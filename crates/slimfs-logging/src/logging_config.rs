// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging section of a config file

use serde::{Deserialize, Serialize};

use crate::{CliLogLevel, LogFormat};

/// Logging settings read from a config file. Command-line flags win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub log_level: Option<CliLogLevel>,
    pub log_format: Option<LogFormat>,
    pub log_file: Option<String>,
}
