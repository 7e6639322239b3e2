// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Records exchanged inside structured payloads

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Access bits carried in directory records and `access` requests.
pub const ACCESS_READ: u32 = libc::R_OK as u32;
pub const ACCESS_WRITE: u32 = libc::W_OK as u32;
pub const ACCESS_EXEC: u32 = libc::X_OK as u32;

/// Origin of a remote failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A native system call failed; `code` is its errno.
    #[serde(rename = "OSError")]
    Os,
    /// The request itself was malformed.
    #[serde(rename = "ProtocolError")]
    Protocol,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Os => "OSError",
            ErrorKind::Protocol => "ProtocolError",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub code: i32,
}

impl ErrorRecord {
    pub fn os(code: i32) -> Self {
        Self {
            kind: ErrorKind::Os,
            code,
        }
    }

    pub fn protocol(code: i32) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            code,
        }
    }
}

/// Envelope of every structured response: `{"ok": v}` or `{"error": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Ok(Value),
    Error(ErrorRecord),
}

impl Reply {
    /// Build the envelope value directly; this cannot fail.
    pub fn into_value(self) -> Value {
        let mut envelope = Map::new();
        match self {
            Reply::Ok(value) => {
                envelope.insert("ok".to_string(), value);
            }
            Reply::Error(record) => {
                let mut error = Map::new();
                error.insert("kind".to_string(), Value::from(record.kind.as_str()));
                error.insert("code".to_string(), Value::from(record.code));
                envelope.insert("error".to_string(), Value::Object(error));
            }
        }
        Value::Object(envelope)
    }

    pub fn into_result(self) -> Result<Value, ErrorRecord> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(record) => Err(record),
        }
    }
}

impl From<Result<Value, ErrorRecord>> for Reply {
    fn from(result: Result<Value, ErrorRecord>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(record) => Reply::Error(record),
        }
    }
}

/// `lstat` view of one entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatAttributes {
    pub st_mode: u32,
    pub st_nlink: u64,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: u64,
    #[serde(default)]
    pub st_rdev: u64,
    #[serde(default)]
    pub st_blocks: u64,
    pub st_atime: i64,
    #[serde(default)]
    pub st_atime_nsec: i64,
    pub st_mtime: i64,
    #[serde(default)]
    pub st_mtime_nsec: i64,
    pub st_ctime: i64,
    #[serde(default)]
    pub st_ctime_nsec: i64,
}

impl StatAttributes {
    pub fn file_type(&self) -> u32 {
        self.st_mode & libc::S_IFMT as u32
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK as u32
    }

    pub fn permissions(&self) -> u32 {
        self.st_mode & 0o7777
    }
}

impl From<&Metadata> for StatAttributes {
    fn from(meta: &Metadata) -> Self {
        Self {
            st_mode: meta.mode(),
            st_nlink: meta.nlink(),
            st_uid: meta.uid(),
            st_gid: meta.gid(),
            st_size: meta.size(),
            st_rdev: meta.rdev(),
            st_blocks: meta.blocks(),
            st_atime: meta.atime(),
            st_atime_nsec: meta.atime_nsec(),
            st_mtime: meta.mtime(),
            st_mtime_nsec: meta.mtime_nsec(),
            st_ctime: meta.ctime(),
            st_ctime_nsec: meta.ctime_nsec(),
        }
    }
}

/// One name inside a directory record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Bitmask of `ACCESS_*` bits the agent process holds on the entry.
    pub access: u32,
    pub attributes: StatAttributes,
}

impl EntryRecord {
    /// Mode 0 asks only whether the entry exists.
    pub fn allows(&self, mode: u32) -> bool {
        self.access & mode == mode
    }
}

/// Result of `xreaddir`: every name in a directory including `"."`.
pub type DirectoryRecord = BTreeMap<String, EntryRecord>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatfsRecord {
    pub f_bsize: u64,
    pub f_frsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_files: u64,
    pub f_ffree: u64,
    pub f_favail: u64,
    pub f_flag: u64,
    pub f_namemax: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_envelope_shape() {
        let ok = serde_json::to_value(Reply::Ok(json!(3))).unwrap();
        assert_eq!(ok, json!({"ok": 3}));

        let err = serde_json::to_value(Reply::Error(ErrorRecord::os(libc::ENOENT))).unwrap();
        assert_eq!(err, json!({"error": {"kind": "OSError", "code": libc::ENOENT}}));

        assert_eq!(Reply::Error(ErrorRecord::os(libc::ENOENT)).into_value(), err);
        assert_eq!(Reply::Ok(json!([1])).into_value(), json!({"ok": [1]}));

        let parsed: Reply =
            serde_json::from_value(json!({"error": {"kind": "ProtocolError", "code": 38}})).unwrap();
        assert_eq!(parsed.into_result(), Err(ErrorRecord::protocol(38)));
    }

    #[test]
    fn null_ok_value_round_trips() {
        let parsed: Reply = serde_json::from_value(json!({"ok": null})).unwrap();
        assert_eq!(parsed.into_result(), Ok(Value::Null));
    }

    #[test]
    fn access_mask_checks_every_bit() {
        let entry = EntryRecord {
            access: ACCESS_READ | ACCESS_EXEC,
            attributes: StatAttributes::default(),
        };
        assert!(entry.allows(0));
        assert!(entry.allows(ACCESS_READ));
        assert!(entry.allows(ACCESS_READ | ACCESS_EXEC));
        assert!(!entry.allows(ACCESS_READ | ACCESS_WRITE));
    }

    #[test]
    fn attributes_without_extended_fields_parse() {
        let attrs: StatAttributes = serde_json::from_value(json!({
            "st_mode": 0o40755,
            "st_nlink": 2,
            "st_uid": 1000,
            "st_gid": 1000,
            "st_size": 4096,
            "st_atime": 1,
            "st_mtime": 2,
            "st_ctime": 3
        }))
        .unwrap();
        assert!(attrs.is_dir());
        assert_eq!(attrs.permissions(), 0o755);
        assert_eq!(attrs.st_blocks, 0);
    }

    #[test]
    fn metadata_conversion_uses_lstat_view() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("missing", &link).unwrap();
        let meta = std::fs::symlink_metadata(&link).unwrap();
        let attrs = StatAttributes::from(&meta);
        assert!(attrs.is_symlink());
        assert_eq!(attrs.st_size, "missing".len() as u64);
    }
}
