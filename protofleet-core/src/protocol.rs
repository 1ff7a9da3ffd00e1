//! Wire protocol shared by the server and the agents.
//!
//! The watch stream carries tagged JSON envelopes (`{"type": ..., "payload": ...}`);
//! the unary calls carry the plain request/response bodies below. Artifact
//! bytes travel as standard base64 strings.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header asking the fetch endpoint to skip the digest comparison.
pub const FORCE_FETCH_HEADER: &str = "x-force-fetch";

/// Messages sent by an agent on the watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "watch:control")]
    Control(Control),
}

/// Messages sent by the server on the watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "watch:batch")]
    Batch(Batch),
}

/// Manifest submission. Replaces the subscriber's manifest and batch size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    /// Manifest text, one `path[:tag]` record per line
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub batch_size: u32,
}

/// One flushed batch of resolved entries, keyed in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub entries: IndexMap<String, BatchEntry>,
    pub has_more: bool,
    pub is_pull: bool,
}

/// Resolution of one manifest entry. Both fields empty means up to date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileBody>,
}

impl BatchEntry {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            file: None,
        }
    }

    pub fn file(content: Bytes, digest: impl Into<String>) -> Self {
        Self {
            error: None,
            file: Some(FileBody {
                content,
                digest: digest.into(),
            }),
        }
    }

    pub fn up_to_date() -> Self {
        Self::default()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.error.is_none() && self.file.is_none()
    }
}

/// Artifact bytes with their digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBody {
    #[serde(with = "base64_bytes")]
    pub content: Bytes,
    pub digest: String,
}

/// Fetch query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// One chunk of an upload stream (newline-delimited JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadChunk {
    pub entries: BTreeMap<String, UploadFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFile {
    #[serde(with = "base64_bytes")]
    pub content: Bytes,
    /// Computed by the server when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Single response closing an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub success: usize,
    pub update: usize,
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareRequest {
    pub manifest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareReport {
    pub matched: usize,
    pub unmatched: Vec<String>,
    /// Manifest paths the server does not have
    pub additional: Vec<String>,
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub path: String,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    #[serde(rename = "match")]
    pub matches: bool,
}

/// Error body returned by the HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
