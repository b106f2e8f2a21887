use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks which chunks are already stored for a content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAlreadyRequest {
    #[serde(rename = "HASH")]
    pub hash: String,
}

/// Requests reassembly of a complete session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMergeRequest {
    #[serde(rename = "HASH")]
    pub hash: String,
    pub count: u64,
}

/// Whole-file upload carried as base64 text.
///
/// `file` may be plain standard base64 or a data URL
/// (`data:image/png;base64,...`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBase64Request {
    pub file: String,
    pub filename: String,
}

impl UploadBase64Request {
    /// Decodes `file` into raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>, ProtocolError> {
        decode_base64_payload(&self.file)
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Chunks already stored for a hash, in index order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAlreadyResponse {
    pub file_list: Vec<String>,
}

/// A stored chunk or file and the URL it is served from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub original_filename: String,
    pub service_path: String,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedFile {
    pub code_text: String,
    /// `<hash>.<ext>` of the merged artifact.
    pub original_filename: String,
    pub service_path: String,
}

/// Data of the `ping` reply: server-side upload parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Chunk size clients should split files into, in bytes.
    pub chunk_size: usize,
}

impl From<MergedFile> for UploadedFile {
    fn from(m: MergedFile) -> Self {
        Self {
            original_filename: m.original_filename,
            service_path: m.service_path,
        }
    }
}

// ---------------------------------------------------------------------------
// Base64 helpers
// ---------------------------------------------------------------------------

/// Decodes standard base64, stripping a leading `data:<mime>;base64,` header.
pub fn decode_base64_payload(input: &str) -> Result<Vec<u8>, ProtocolError> {
    use base64::{Engine, engine::general_purpose::STANDARD};

    let trimmed = input.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((_mime, body)) => body,
            None => {
                return Err(ProtocolError::InvalidBase64(
                    "data URL is not base64-encoded".into(),
                ));
            }
        },
        None => trimmed,
    };

    STANDARD
        .decode(body)
        .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))
}
