//! WebSocket transport for chunkyard uploads.
//!
//! Accepts any number of client connections, dispatches JSON and binary
//! requests to a [`Handler`], and manages the connection lifecycle
//! (ping/pong, graceful shutdown). [`UploadHandler`] is the handler that
//! maps requests onto a [`chunkyard_transfer::UploadService`].

mod adapter;
mod connection;
mod handler;
mod server;

pub use adapter::{UploadHandler, error_code};
pub use connection::{ClientConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, UploadServer};

/// Send buffer capacity per connection.
///
/// A client may pipeline many chunk uploads on one connection and each gets
/// its own reply, so the buffer is sized well above the client's parallelism.
pub const SEND_BUFFER_SIZE: usize = 2048;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server shutting down")]
    ShuttingDown,
}
