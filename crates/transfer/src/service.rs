use tokio::io::AsyncRead;
use tracing::{error, info, warn};

use crate::TransferError;
use crate::hasher::checksum_bytes;
use crate::locks::SessionLocks;
use crate::merge::merge_chunks;
use crate::naming::{ChunkName, extension_of};
use crate::store::ChunkStore;
use crate::types::{MergedArtifact, StoredFile};

/// The upload session protocol: probe, accept and merge on top of a
/// [`ChunkStore`].
///
/// Accepts and merges for the same hash are serialized; different hashes
/// proceed independently.
#[derive(Debug)]
pub struct UploadService {
    store: ChunkStore,
    locks: SessionLocks,
}

impl UploadService {
    pub fn new(store: ChunkStore) -> Self {
        Self {
            store,
            locks: SessionLocks::new(),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Lists the chunk filenames already stored for `hash`.
    ///
    /// Never fails: store errors are logged and reported as no chunks, so
    /// the client simply re-uploads.
    pub async fn probe_existing(&self, hash: &str) -> Vec<String> {
        match self.store.list_chunks(hash).await {
            Ok(list) => list,
            Err(e) => {
                warn!(hash = %hash, error = %e, "probe failed, reporting no chunks");
                Vec::new()
            }
        }
    }

    /// Stores one chunk. `filename` must be `<hash>_<index>...`.
    pub async fn accept_chunk<R>(
        &self,
        filename: &str,
        payload: &mut R,
    ) -> Result<StoredFile, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let name = ChunkName::parse(filename)?;

        let _guard = self.locks.lock(&name.hash).await;
        let written = self
            .store
            .write_chunk(&name.hash, filename, payload)
            .await
            .inspect_err(|e| log_failure("chunk upload", &name.hash, e))?;

        info!(
            hash = %name.hash,
            index = name.index,
            bytes = written.size_bytes,
            "chunk stored"
        );
        Ok(StoredFile {
            original_filename: filename.to_string(),
            stored_path: written.path,
        })
    }

    /// Stores a complete file at `<root>/<sha256(payload)>[.<ext>]`,
    /// overwriting any previous artifact of the same content.
    pub async fn accept_whole_file(
        &self,
        payload: &[u8],
        filename: &str,
    ) -> Result<StoredFile, TransferError> {
        if filename.is_empty() {
            return Err(TransferError::InvalidFilename("empty filename".into()));
        }
        let hash = checksum_bytes(payload);
        let extension = extension_of(filename);

        let _guard = self.locks.lock(&hash).await;
        let path = self
            .store
            .write_artifact(&hash, extension.as_deref(), payload)
            .await
            .inspect_err(|e| log_failure("whole-file upload", &hash, e))?;

        info!(hash = %hash, bytes = payload.len(), file = %filename, "artifact stored");
        Ok(StoredFile {
            original_filename: filename.to_string(),
            stored_path: path,
        })
    }

    /// Reassembles the session of `hash` from `count` chunks.
    pub async fn merge(&self, hash: &str, count: u64) -> Result<MergedArtifact, TransferError> {
        let _guard = self.locks.lock(hash).await;
        merge_chunks(&self.store, hash, count)
            .await
            .inspect_err(|e| log_failure("merge", hash, e))
    }
}

fn log_failure(op: &str, hash: &str, err: &TransferError) {
    if err.is_recoverable() {
        warn!(hash = %hash, error = %err, "{op} rejected");
    } else {
        error!(hash = %hash, error = %err, "{op} failed");
    }
}
