use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::naming::{ChunkName, extension_of};
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Content hash
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
///
/// The result is the session id used to name the file's chunks.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Number of chunks a file of `file_size` bytes splits into.
///
/// An empty file still counts as one (empty) chunk.
pub fn chunk_count(file_size: u64, chunk_size: usize) -> u64 {
    let chunk_size = effective_chunk_size(chunk_size) as u64;
    file_size.div_ceil(chunk_size).max(1)
}

fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

// ---------------------------------------------------------------------------
// FileSplitter
// ---------------------------------------------------------------------------

/// One piece of a split file, named for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePiece {
    pub index: u64,
    /// `<hash>_<index>[.<ext>]`
    pub filename: String,
    pub data: Vec<u8>,
}

/// Reads a file in fixed-size pieces named after its content hash.
pub struct FileSplitter {
    file: std::fs::File,
    hash: String,
    extension: Option<String>,
    chunk_size: usize,
    file_size: u64,
    next_index: u64,
}

impl FileSplitter {
    /// Opens `path` and hashes it.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let hash = calculate_file_checksum(path)?;
        Self::with_hash(path, hash, chunk_size)
    }

    /// Opens `path` using a precomputed (or client-declared) hash.
    pub fn with_hash(
        path: &Path,
        hash: String,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        crate::naming::validate_hash(&hash)?;
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let extension = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(extension_of);
        Ok(Self {
            file,
            hash,
            extension,
            chunk_size: effective_chunk_size(chunk_size),
            file_size,
            next_index: 0,
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total number of pieces.
    pub fn chunk_count(&self) -> u64 {
        chunk_count(self.file_size, self.chunk_size)
    }

    /// Upload filename of piece `index`.
    pub fn filename_for(&self, index: u64) -> String {
        ChunkName::format(&self.hash, index, self.extension.as_deref())
    }

    /// Reads piece `index`. Used to re-send only the pieces a server is
    /// missing.
    pub fn read_piece(&mut self, index: u64) -> Result<FilePiece, TransferError> {
        let count = self.chunk_count();
        if index >= count {
            return Err(TransferError::UnexpectedChunkIndex { index, count });
        }

        let offset = index * self.chunk_size as u64;
        let len = (self.file_size - offset).min(self.chunk_size as u64) as usize;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len];
        self.file.read_exact(&mut data)?;

        Ok(FilePiece {
            index,
            filename: self.filename_for(index),
            data,
        })
    }

    /// Reads the next piece in order. Returns `None` after the last one.
    pub fn next_piece(&mut self) -> Result<Option<FilePiece>, TransferError> {
        if self.next_index >= self.chunk_count() {
            return Ok(None);
        }
        let piece = self.read_piece(self.next_index)?;
        self.next_index += 1;
        Ok(Some(piece))
    }
}
