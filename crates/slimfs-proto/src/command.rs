// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Command vocabulary understood by the remote agent

use std::fmt;
use std::str::FromStr;

/// One remote filesystem call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Access,
    Chmod,
    Create,
    Flush,
    Fsync,
    Getattr,
    Link,
    Mkdir,
    Mknod,
    Open,
    Read,
    Readdir,
    Readlink,
    Release,
    Rename,
    Rmdir,
    Statfs,
    Symlink,
    Truncate,
    Unlink,
    Utimens,
    Write,
    Xreaddir,
}

impl Command {
    pub const ALL: [Command; 23] = [
        Command::Access,
        Command::Chmod,
        Command::Create,
        Command::Flush,
        Command::Fsync,
        Command::Getattr,
        Command::Link,
        Command::Mkdir,
        Command::Mknod,
        Command::Open,
        Command::Read,
        Command::Readdir,
        Command::Readlink,
        Command::Release,
        Command::Rename,
        Command::Rmdir,
        Command::Statfs,
        Command::Symlink,
        Command::Truncate,
        Command::Unlink,
        Command::Utimens,
        Command::Write,
        Command::Xreaddir,
    ];

    /// Wire name carried in the request command field.
    pub fn name(self) -> &'static str {
        match self {
            Command::Access => "access",
            Command::Chmod => "chmod",
            Command::Create => "create",
            Command::Flush => "flush",
            Command::Fsync => "fsync",
            Command::Getattr => "getattr",
            Command::Link => "link",
            Command::Mkdir => "mkdir",
            Command::Mknod => "mknod",
            Command::Open => "open",
            Command::Read => "read",
            Command::Readdir => "readdir",
            Command::Readlink => "readlink",
            Command::Release => "release",
            Command::Rename => "rename",
            Command::Rmdir => "rmdir",
            Command::Statfs => "statfs",
            Command::Symlink => "symlink",
            Command::Truncate => "truncate",
            Command::Unlink => "unlink",
            Command::Utimens => "utimens",
            Command::Write => "write",
            Command::Xreaddir => "xreaddir",
        }
    }

    /// Whether a successful call changes directory listings or entry
    /// attributes that a metadata cache may hold.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Command::Chmod
                | Command::Create
                | Command::Link
                | Command::Mkdir
                | Command::Mknod
                | Command::Rename
                | Command::Rmdir
                | Command::Symlink
                | Command::Truncate
                | Command::Unlink
                | Command::Utimens
                | Command::Write
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|command| command.name() == s)
            .ok_or_else(|| format!("unknown command: {}", s))
    }
}
