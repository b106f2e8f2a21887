//! Upload client for chunkyard servers.
//!
//! [`WsClient`] speaks the request/response protocol over WebSocket;
//! [`ChunkedUploader`] drives a resumable upload on top of any
//! [`UploadTransport`]: hash the file, ask the server which chunks it
//! already has, send the rest, then merge.

mod pumps;
pub mod transport;
pub mod uploader;
pub mod ws_client;

pub use transport::{TransportFuture, UploadTransport};
pub use uploader::{ChunkedUploader, DEFAULT_PARALLELISM, UploadOutcome};
pub use ws_client::WsClient;

/// Errors from the upload client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkyard_transfer::TransferError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("upload cancelled")]
    Cancelled,

    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    #[error("response missing data")]
    MissingData,
}

impl ClientError {
    /// Returns `true` if the server rejected a chunk because it already has
    /// it.
    pub fn is_already_stored(&self) -> bool {
        matches!(
            self,
            ClientError::Server { code, .. }
                if *code == chunkyard_protocol::constants::ERR_CODE_CONFLICT
        )
    }
}
