//! Resumable chunked upload driver.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chunkyard_transfer::{DEFAULT_CHUNK_SIZE, FilePiece, FileSplitter};

// `FileSplitter` does blocking `std::fs` I/O; it only runs inside
// `spawn_blocking`.

use crate::ClientError;
use crate::transport::UploadTransport;

/// Chunk uploads kept in flight at once.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Summary of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Content hash of the file.
    pub hash: String,
    /// Name the server stored the file under.
    pub stored_filename: String,
    /// URL the file is served from.
    pub service_path: String,
    /// Total pieces the file was split into (1 for whole-file uploads).
    pub chunk_count: u64,
    /// Pieces sent in this run.
    pub uploaded: u64,
    /// Pieces the server already had.
    pub skipped: u64,
}

/// Uploads files over an [`UploadTransport`], resuming partial uploads.
///
/// Files no larger than one chunk are sent in a single request. Larger files
/// are hashed, the server is asked which chunks it already stores, the rest
/// are sent concurrently, and the server is asked to merge.
pub struct ChunkedUploader<T: UploadTransport> {
    transport: Arc<T>,
    chunk_size: usize,
    parallelism: usize,
}

impl<T: UploadTransport> ChunkedUploader<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Sets the chunk size (0 selects the default).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    /// Sets how many chunk uploads may be in flight (minimum 1).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Uploads the file at `path`.
    ///
    /// `cancel` is checked before each chunk is sent; chunks already sent stay
    /// on the server and are skipped by the next attempt.
    pub async fn upload_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, ClientError> {
        let splitter = open_splitter(path, self.chunk_size).await?;
        let hash = splitter.hash().to_string();
        let count = splitter.chunk_count();

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        if splitter.file_size() <= self.chunk_size as u64 {
            return self.upload_whole(path, &hash).await;
        }

        let existing: HashSet<String> = self.transport.probe(&hash).await?.into_iter().collect();
        let missing: Vec<u64> = (0..count)
            .filter(|&i| !existing.contains(&splitter.filename_for(i)))
            .collect();
        info!(
            hash = %hash,
            chunks = count,
            missing = missing.len(),
            "starting chunked upload"
        );

        let mut skipped = count - missing.len() as u64;
        let transport = &self.transport;
        let splitter = Arc::new(Mutex::new(splitter));
        let mut uploads = stream::iter(missing)
            .map(|index| {
                let splitter = Arc::clone(&splitter);
                async move {
                    if cancel.is_cancelled() {
                        return Err(ClientError::Cancelled);
                    }
                    let piece = read_piece(splitter, index).await?;
                    send_piece(transport.as_ref(), piece).await
                }
            })
            .buffer_unordered(self.parallelism);

        let mut uploaded = 0u64;
        while let Some(result) = uploads.next().await {
            match result {
                Ok(()) => uploaded += 1,
                Err(e) if e.is_already_stored() => skipped += 1,
                Err(e) => return Err(e),
            }
        }
        drop(uploads);

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let merged = self.transport.merge(&hash, count).await?;
        info!(hash = %hash, uploaded, skipped, "upload merged");

        Ok(UploadOutcome {
            hash,
            stored_filename: merged.original_filename,
            service_path: merged.service_path,
            chunk_count: count,
            uploaded,
            skipped,
        })
    }

    async fn upload_whole(&self, path: &Path, hash: &str) -> Result<UploadOutcome, ClientError> {
        let data = tokio::fs::read(path).await.map_err(chunkyard_transfer::TransferError::from)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| hash.to_string());

        let stored = self.transport.upload_file(&filename, &data).await?;
        info!(hash = %hash, bytes = data.len(), "whole file uploaded");

        let stored_filename = stored
            .service_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(UploadOutcome {
            hash: hash.to_string(),
            stored_filename,
            service_path: stored.service_path,
            chunk_count: 1,
            uploaded: 1,
            skipped: 0,
        })
    }
}

async fn open_splitter(path: &Path, chunk_size: usize) -> Result<FileSplitter, ClientError> {
    let path = path.to_path_buf();
    let splitter =
        tokio::task::spawn_blocking(move || FileSplitter::open(&path, chunk_size)).await??;
    Ok(splitter)
}

async fn read_piece(
    splitter: Arc<Mutex<FileSplitter>>,
    index: u64,
) -> Result<FilePiece, ClientError> {
    let piece = tokio::task::spawn_blocking(move || {
        splitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_piece(index)
    })
    .await??;
    Ok(piece)
}

async fn send_piece<T: UploadTransport + ?Sized>(
    transport: &T,
    piece: FilePiece,
) -> Result<(), ClientError> {
    transport.upload_chunk(&piece.filename, &piece.data).await?;
    debug!(index = piece.index, bytes = piece.data.len(), "chunk sent");
    Ok(())
}
