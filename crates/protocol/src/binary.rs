//! Binary message protocol: 4-byte big-endian header length + JSON header + raw payload.

use serde::{Deserialize, Serialize};

use crate::constants::MessageType;

/// Header carried in front of every binary upload frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryHeader {
    pub id: String,
    /// [`MessageType::UploadChunk`] or [`MessageType::Upload`].
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Chunk name (`<hash>_<index>[...][.ext]`) or the original file name.
    pub filename: String,
}

/// A parsed binary frame.
#[derive(Debug)]
pub struct BinaryMessage {
    pub header: BinaryHeader,
    pub data: Vec<u8>,
}

/// Parses a raw binary WebSocket frame into a [`BinaryMessage`].
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_binary_message(data: &[u8]) -> Result<BinaryMessage, ParseError> {
    if data.len() < 4 {
        return Err(ParseError::TooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if data.len() - 4 < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: data.len() - 4,
        });
    }

    let header_bytes = &data[4..4 + header_len];
    let header: BinaryHeader =
        serde_json::from_slice(header_bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    Ok(BinaryMessage {
        header,
        data: data[4 + header_len..].to_vec(),
    })
}

/// Encodes a binary message for sending over WebSocket.
pub fn encode_binary_message<T: Serialize>(
    header: &T,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Errors from binary message parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}
