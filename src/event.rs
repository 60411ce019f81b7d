// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication request decoding.
//!
//! Payloads arrive as UTF-8 JSON:
//!
//! ```json
//! { "version": 1, "bucketname": "photos", "fileguid": "5f1c..." }
//! ```
//!
//! Decoding is two-phase. The bytes are first parsed into a generic JSON
//! object, then projected into a [`ReplicationRequest`] with explicit field
//! checks. The two phases fail differently:
//!
//! - Bytes that are not a JSON object at all are **malformed** and produce a
//!   [`ReplicationError::Decode`].
//! - A JSON object that does not describe a supported request is **ignored**:
//!   wrong or missing `version`, or a missing, empty or non-string
//!   `bucketname` / `fileguid`. This is a normal outcome, not an error.
//!
//! Unknown fields are tolerated so producers can add metadata without
//! breaking older consumers.

use crate::error::{ReplicationError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// The only payload schema this consumer understands.
pub const SUPPORTED_SCHEMA_VERSION: i64 = 1;

const VERSION_FIELD: &str = "version";
const BUCKET_FIELD: &str = "bucketname";
const OBJECT_KEY_FIELD: &str = "fileguid";

/// A validated request to copy one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRequest {
    /// Always [`SUPPORTED_SCHEMA_VERSION`] once decoded.
    pub schema_version: i64,
    /// Bucket on the source store; the copy lands in the same bucket name.
    pub bucket: String,
    /// Object key within the bucket.
    pub object_key: String,
}

/// Wire shape, used for encoding only.
#[derive(Serialize)]
struct WirePayload<'a> {
    version: i64,
    bucketname: &'a str,
    fileguid: &'a str,
}

impl ReplicationRequest {
    /// Build a current-version request.
    pub fn new(bucket: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            schema_version: SUPPORTED_SCHEMA_VERSION,
            bucket: bucket.into(),
            object_key: object_key.into(),
        }
    }

    /// Encode to the JSON payload producers publish.
    pub fn to_payload(&self) -> Vec<u8> {
        let wire = WirePayload {
            version: self.schema_version,
            bucketname: &self.bucket,
            fileguid: &self.object_key,
        };
        // Serializing a struct of integers and strings cannot fail.
        serde_json::to_vec(&wire).unwrap_or_default()
    }
}

impl fmt::Display for ReplicationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.object_key)
    }
}

/// Why a well-formed payload was not turned into a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `version` absent, not an integer, or not the supported version.
    UnsupportedVersion(Option<Value>),
    /// `bucketname` absent, empty, or not a string.
    MissingBucket,
    /// `fileguid` absent, empty, or not a string.
    MissingObjectKey,
}

impl IgnoreReason {
    /// Short label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::MissingBucket => "missing_bucket",
            Self::MissingObjectKey => "missing_object_key",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(Some(v)) => write!(f, "unsupported version {}", v),
            Self::UnsupportedVersion(None) => write!(f, "missing version"),
            Self::MissingBucket => write!(f, "missing or empty {}", BUCKET_FIELD),
            Self::MissingObjectKey => write!(f, "missing or empty {}", OBJECT_KEY_FIELD),
        }
    }
}

/// Outcome of decoding a structurally valid payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Request(ReplicationRequest),
    Ignored(IgnoreReason),
}

impl Decoded {
    /// Drop the ignore reason.
    pub fn into_request(self) -> Option<ReplicationRequest> {
        match self {
            Self::Request(request) => Some(request),
            Self::Ignored(_) => None,
        }
    }
}

/// Decode a payload, reporting why it was ignored.
///
/// # Errors
///
/// Returns [`ReplicationError::Decode`] when the bytes are not UTF-8, not
/// JSON, or not a JSON object.
pub fn classify(raw: &[u8]) -> Result<Decoded> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| ReplicationError::Decode(format!("payload is not UTF-8: {}", e)))?;

    let value: Value = serde_json::from_str(text)
        .map_err(|e| ReplicationError::Decode(format!("payload is not JSON: {}", e)))?;

    let Value::Object(fields) = value else {
        return Err(ReplicationError::Decode(format!(
            "payload is JSON {} rather than an object",
            json_type_name(&value)
        )));
    };

    Ok(project(&fields))
}

/// Decode a payload into a request, or `None` when it should be ignored.
///
/// # Errors
///
/// See [`classify`].
pub fn decode(raw: &[u8]) -> Result<Option<ReplicationRequest>> {
    classify(raw).map(Decoded::into_request)
}

fn project(fields: &Map<String, Value>) -> Decoded {
    let version = fields.get(VERSION_FIELD);
    if !version.is_some_and(is_supported_version) {
        return Decoded::Ignored(IgnoreReason::UnsupportedVersion(version.cloned()));
    }

    let Some(bucket) = non_empty_string(fields, BUCKET_FIELD) else {
        return Decoded::Ignored(IgnoreReason::MissingBucket);
    };
    let Some(object_key) = non_empty_string(fields, OBJECT_KEY_FIELD) else {
        return Decoded::Ignored(IgnoreReason::MissingObjectKey);
    };

    Decoded::Request(ReplicationRequest {
        schema_version: SUPPORTED_SCHEMA_VERSION,
        bucket: bucket.to_string(),
        object_key: object_key.to_string(),
    })
}

/// Numeric comparison: `1` and `1.0` both match, `"1"` and `1.5` do not.
fn is_supported_version(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64() == Some(SUPPORTED_SCHEMA_VERSION as f64),
        _ => false,
    }
}

fn non_empty_string<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
