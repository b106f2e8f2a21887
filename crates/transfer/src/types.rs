use std::path::PathBuf;

use crate::naming::ChunkName;

/// Location of a stored chunk or whole file, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// The filename the client sent.
    pub original_filename: String,
    /// Where the bytes landed on disk.
    pub stored_path: PathBuf,
}

/// A chunk that was just written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenChunk {
    pub name: ChunkName,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// The result of reassembling a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedArtifact {
    pub hash: String,
    pub extension: Option<String>,
    /// `<hash>.<ext>` (or `<hash>` without extension).
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub chunk_count: u64,
}
