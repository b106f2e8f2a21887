use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for any incoming frame before the peer is considered dead.
///
/// Set high enough to tolerate slow merges of large sessions, during which
/// the server sends nothing on that request.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings (must be well below [`WS_PONG_WAIT`]).
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Default chunk size used by clients (1 MB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Timeout for request/response operations (text messages).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for binary request/response operations (chunk and file uploads).
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Request type identifier.
///
/// Names follow the HTTP routes of the browser client (`/upload_already`,
/// `/upload_chunk`, ...), so a thin HTTP bridge can forward them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "ping")]
    Ping,

    /// Lists the chunks already stored for a hash.
    #[serde(rename = "upload_already")]
    UploadAlready,
    /// Binary: one chunk of a session.
    #[serde(rename = "upload_chunk")]
    UploadChunk,
    /// Binary: a whole file, stored under its content digest.
    #[serde(rename = "upload")]
    Upload,
    /// Text: a whole file as base64 (optionally a data URL).
    #[serde(rename = "upload_base64")]
    UploadBase64,
    /// Reassembles a complete session into one artifact.
    #[serde(rename = "upload_merge")]
    UploadMerge,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Envelope code for a successful response.
pub const CODE_OK: i32 = 0;

/// Common failure codes.
pub const ERR_CODE_BAD_REQUEST: i32 = 400;
pub const ERR_CODE_NOT_FOUND: i32 = 404;
pub const ERR_CODE_CONFLICT: i32 = 409;
pub const ERR_CODE_UNPROCESSABLE: i32 = 422;
pub const ERR_CODE_INTERNAL: i32 = 500;
pub const ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
