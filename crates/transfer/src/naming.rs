//! Chunk and artifact naming.
//!
//! A chunk filename is `<hash>_<index>` optionally followed by any suffix
//! and a `.<ext>`. The hash is everything before the first underscore; the
//! index is the digit run immediately after it.

use crate::TransferError;

/// A parsed chunk filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkName {
    /// Content hash of the whole file (session id).
    pub hash: String,
    /// 0-based position of the chunk.
    pub index: u64,
    /// Lowercase extension without the dot, if any.
    pub extension: Option<String>,
    /// The filename as uploaded.
    pub filename: String,
}

impl ChunkName {
    /// Parses `filename`, validating that its hash is a safe path component.
    pub fn parse(filename: &str) -> Result<Self, TransferError> {
        if filename.is_empty() {
            return Err(TransferError::InvalidFilename("empty filename".into()));
        }
        if filename.contains(['/', '\\', '\0']) {
            return Err(TransferError::InvalidFilename(format!(
                "path separators not allowed: {filename}"
            )));
        }

        let (hash, rest) = filename.split_once('_').ok_or_else(|| {
            TransferError::InvalidFilename(format!("expected <hash>_<index>: {filename}"))
        })?;

        let digits = rest
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(TransferError::InvalidFilename(format!(
                "missing chunk index: {filename}"
            )));
        }

        let index = rest[..digits].parse::<u64>().map_err(|_| {
            TransferError::InvalidFilename(format!("chunk index out of range: {filename}"))
        })?;

        validate_hash(hash)?;

        Ok(Self {
            hash: hash.to_string(),
            index,
            extension: extension_of(filename),
            filename: filename.to_string(),
        })
    }

    /// Builds a chunk filename: `<hash>_<index>[.<ext>]`.
    pub fn format(hash: &str, index: u64, extension: Option<&str>) -> String {
        match extension {
            Some(ext) => format!("{hash}_{index}.{ext}"),
            None => format!("{hash}_{index}"),
        }
    }
}

/// Returns the trailing `.<word>` extension of `filename`, lowercased.
///
/// Word characters are ASCII letters, digits and `_`.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Validates that `hash` can be used as a single directory name under the
/// upload root.
///
/// Rejects empty hashes, path separators, NUL, and names starting with `.`
/// (which also covers `.` and `..`, and keeps hashes disjoint from the
/// store's hidden temporary files).
pub fn validate_hash(hash: &str) -> Result<(), TransferError> {
    if hash.is_empty() {
        return Err(TransferError::InvalidFilename("empty hash".into()));
    }
    if hash.starts_with('.') {
        return Err(TransferError::InvalidFilename(format!(
            "hash must not start with '.': {hash}"
        )));
    }
    if hash.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidFilename(format!(
            "path separators not allowed in hash: {hash}"
        )));
    }
    Ok(())
}

/// Filename of a merged or whole-file artifact: `<hash>[.<ext>]`.
pub fn artifact_filename(hash: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{hash}.{ext}"),
        None => hash.to_string(),
    }
}
