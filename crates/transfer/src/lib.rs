//! Resumable chunked upload: chunk store, merge engine and session protocol.
//!
//! Chunks of one file are staged under `<root>/<hash>/<hash>_<index>[.ext]`
//! and reassembled into `<root>/<hash>[.ext]` once every index is present.
//! [`UploadService`] is the entry point used by transports; the client side
//! uses [`calculate_file_checksum`] and [`FileSplitter`] to produce the
//! pieces.

mod hasher;
mod locks;
mod merge;
mod naming;
mod service;
mod store;
mod types;

pub use hasher::{FilePiece, FileSplitter, calculate_file_checksum, checksum_bytes, chunk_count};
pub use locks::{SessionGuard, SessionLocks};
pub use merge::merge_chunks;
pub use naming::{ChunkName, artifact_filename, extension_of, validate_hash};
pub use service::UploadService;
pub use store::{ChunkStore, STAGING_DIR};
pub use types::{MergedArtifact, StoredFile, WrittenChunk};

pub use chunkyard_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("chunk already exists: {0}")]
    ChunkAlreadyExists(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("upload incomplete: {stored} of {expected} chunks stored, missing {missing:?}")]
    IncompleteUpload {
        expected: u64,
        stored: u64,
        /// First missing indices (bounded list).
        missing: Vec<u64>,
    },

    #[error("nothing to merge: chunk count must be positive")]
    EmptyUpload,

    #[error("duplicate chunk index {index}")]
    DuplicateChunkIndex { index: u64 },

    #[error("chunk index {index} out of range for {count} chunks")]
    UnexpectedChunkIndex { index: u64, count: u64 },

    #[error("extension mismatch: expected '{expected}', found '{found}'")]
    ExtensionMismatch { expected: String, found: String },
}

impl TransferError {
    /// Returns `true` for validation failures the client can act on
    /// (retry, resume, fix the request). Storage failures return `false`.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransferError::Io(_))
    }
}
