//! Wire protocol types for chunkyard client-server communication.
//!
//! Requests are JSON [`Message`]s (text frames) or length-prefixed binary
//! frames carrying chunk bytes; every request is answered with one
//! [`Envelope`] of the shape `{code, message, success, data}`.

pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use binary::{BinaryHeader, BinaryMessage, ParseError, encode_binary_message, parse_binary_message};
pub use constants::MessageType;
pub use envelope::{Envelope, Message};
pub use messages::{
    MergedFile, ServerInfo, UploadAlreadyRequest, UploadAlreadyResponse, UploadBase64Request,
    UploadMergeRequest, UploadedFile, decode_base64_payload,
};

/// Errors produced while decoding protocol payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}
