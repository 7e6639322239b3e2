// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Typed access to the flat parameter object of a request

use base64::Engine as _;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::frame::Payload;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing parameter '{0}'")]
    Missing(String),
    #[error("parameter '{name}' should be {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
    },
    #[error("parameter '{0}' is not valid base64")]
    InvalidBase64(String),
    #[error("request parameters must be a JSON object")]
    NotAMapping,
}

/// Parameters of one request. Handlers pull only the keys they need.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    map: Map<String, Value>,
}

impl Params {
    pub fn new(map: Map<String, Value>) -> Self {
        Self { map }
    }

    /// Interpret a request payload. A raw or null payload means no
    /// parameters.
    pub fn from_payload(payload: Payload) -> Result<Self, ParamError> {
        match payload {
            Payload::Structured(Value::Object(map)) => Ok(Self { map }),
            Payload::Structured(Value::Null) => Ok(Self::default()),
            Payload::Raw(bytes) if bytes.is_empty() => Ok(Self::default()),
            _ => Err(ParamError::NotAMapping),
        }
    }

    pub fn into_payload(self) -> Payload {
        Payload::Structured(Value::Object(self.map))
    }

    fn required(&self, name: &str) -> Result<&Value, ParamError> {
        match self.map.get(name) {
            Some(Value::Null) | None => Err(ParamError::Missing(name.to_string())),
            Some(value) => Ok(value),
        }
    }

    fn wrong(name: &str, expected: &'static str) -> ParamError {
        ParamError::WrongType {
            name: name.to_string(),
            expected,
        }
    }

    pub fn str(&self, name: &str) -> Result<&str, ParamError> {
        self.required(name)?
            .as_str()
            .ok_or_else(|| Self::wrong(name, "a string"))
    }

    pub fn u64(&self, name: &str) -> Result<u64, ParamError> {
        self.required(name)?
            .as_u64()
            .ok_or_else(|| Self::wrong(name, "a non-negative integer"))
    }

    pub fn i64(&self, name: &str) -> Result<i64, ParamError> {
        self.required(name)?
            .as_i64()
            .ok_or_else(|| Self::wrong(name, "an integer"))
    }

    pub fn u32(&self, name: &str) -> Result<u32, ParamError> {
        u32::try_from(self.u64(name)?).map_err(|_| Self::wrong(name, "a 32-bit integer"))
    }

    pub fn opt_u32(&self, name: &str) -> Result<Option<u32>, ParamError> {
        match self.map.get(name) {
            Some(Value::Null) | None => Ok(None),
            Some(_) => self.u32(name).map(Some),
        }
    }

    /// Integers and booleans both count as flags.
    pub fn flag(&self, name: &str) -> Result<bool, ParamError> {
        match self.required(name)? {
            Value::Bool(b) => Ok(*b),
            value => value
                .as_i64()
                .map(|n| n != 0)
                .ok_or_else(|| Self::wrong(name, "a boolean or integer")),
        }
    }

    /// Decode a base64 string parameter.
    pub fn bytes(&self, name: &str) -> Result<Vec<u8>, ParamError> {
        base64::engine::general_purpose::STANDARD
            .decode(self.str(name)?)
            .map_err(|_| ParamError::InvalidBase64(name.to_string()))
    }

    /// Optional `[atime, mtime]` pair of fractional seconds.
    pub fn opt_times(&self, name: &str) -> Result<Option<(f64, f64)>, ParamError> {
        let items = match self.map.get(name) {
            Some(Value::Null) | None => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(Self::wrong(name, "a [atime, mtime] pair")),
        };
        match items.as_slice() {
            [atime, mtime] => match (atime.as_f64(), mtime.as_f64()) {
                (Some(atime), Some(mtime)) => Ok(Some((atime, mtime))),
                _ => Err(Self::wrong(name, "a pair of numbers")),
            },
            _ => Err(Self::wrong(name, "a [atime, mtime] pair")),
        }
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self::new(map)
    }
}

/// Encode bytes the way `write` expects its `data` parameter.
pub fn encode_bytes(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        Params::from_payload(Payload::Structured(value)).unwrap()
    }

    #[test]
    fn typed_accessors() {
        let p = params(json!({"path": "/a", "fh": 7, "offset": -1, "datasync": 1}));
        assert_eq!(p.str("path").unwrap(), "/a");
        assert_eq!(p.u64("fh").unwrap(), 7);
        assert_eq!(p.i64("offset").unwrap(), -1);
        assert!(p.flag("datasync").unwrap());
        assert_eq!(p.opt_u32("mode").unwrap(), None);
    }

    #[test]
    fn missing_and_wrong_types_are_reported() {
        let p = params(json!({"path": 3, "mode": null}));
        assert_eq!(p.str("name"), Err(ParamError::Missing("name".into())));
        assert!(matches!(p.str("path"), Err(ParamError::WrongType { .. })));
        assert!(matches!(p.u64("mode"), Err(ParamError::Missing(_))));
        assert!(matches!(
            params(json!({"fh": -2})).u64("fh"),
            Err(ParamError::WrongType { .. })
        ));
    }

    #[test]
    fn base64_data() {
        let p = params(json!({"data": encode_bytes(b"\x00\xffhi"), "bad": "!!"}));
        assert_eq!(p.bytes("data").unwrap(), b"\x00\xffhi");
        assert_eq!(p.bytes("bad"), Err(ParamError::InvalidBase64("bad".into())));
    }

    #[test]
    fn times_pair() {
        assert_eq!(
            params(json!({"times": [1.5, 2]})).opt_times("times").unwrap(),
            Some((1.5, 2.0))
        );
        assert_eq!(params(json!({})).opt_times("times").unwrap(), None);
        assert!(params(json!({"times": [1]})).opt_times("times").is_err());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert_eq!(
            Params::from_payload(Payload::Structured(json!([1, 2]))),
            Err(ParamError::NotAMapping)
        );
        assert_eq!(
            Params::from_payload(Payload::Raw(b"x".to_vec())),
            Err(ParamError::NotAMapping)
        );
        assert!(Params::from_payload(Payload::Structured(Value::Null)).is_ok());
    }
}
