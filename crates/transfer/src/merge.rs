//! Reassembly of a complete chunk set into one artifact.

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::TransferError;
use crate::naming::{ChunkName, artifact_filename};
use crate::store::ChunkStore;
use crate::types::MergedArtifact;

/// Upper bound on the missing indices reported by
/// [`TransferError::IncompleteUpload`].
const MAX_REPORTED_MISSING: usize = 16;

/// Merges the chunks of `hash` into `<root>/<hash>[.<ext>]`.
///
/// The chunk set is validated before any byte moves; on a validation error
/// the session directory is left untouched. Each chunk is deleted as soon as
/// its bytes are appended and the session directory is removed at the end.
/// An I/O error mid-way leaves a partial artifact and is not rolled back.
///
/// Callers must hold the session lock for `hash`.
pub async fn merge_chunks(
    store: &ChunkStore,
    hash: &str,
    expected_count: u64,
) -> Result<MergedArtifact, TransferError> {
    if !store.session_exists(hash).await? {
        return Err(TransferError::SessionNotFound(hash.to_string()));
    }

    let chunks = store.list_chunk_names(hash).await?;
    let stored = chunks.len() as u64;
    if stored < expected_count {
        return Err(TransferError::IncompleteUpload {
            expected: expected_count,
            stored,
            missing: missing_indices(&chunks, expected_count),
        });
    }

    let extension = validate_chunk_set(&chunks, expected_count)?;

    let filename = artifact_filename(hash, extension.as_deref());
    let path = store.root().join(&filename);
    let session_dir = store.session_dir(hash);

    let mut output = fs::File::create(&path).await?;
    let mut size_bytes = 0u64;
    for chunk in &chunks {
        let chunk_path = session_dir.join(&chunk.filename);
        let mut input = fs::File::open(&chunk_path).await?;
        let n = tokio::io::copy(&mut input, &mut output).await?;
        drop(input);
        fs::remove_file(&chunk_path).await?;
        size_bytes += n;
        debug!(hash = %hash, index = chunk.index, bytes = n, "chunk appended");
    }
    output.flush().await?;
    output.sync_all().await?;
    drop(output);

    store.remove_session_directory(hash).await?;

    info!(
        hash = %hash,
        chunks = stored,
        bytes = size_bytes,
        file = %filename,
        "merge complete"
    );

    Ok(MergedArtifact {
        hash: hash.to_string(),
        extension,
        filename,
        path,
        size_bytes,
        chunk_count: stored,
    })
}

/// Checks that `chunks` (sorted by index) is exactly `0..count` with one
/// shared extension, and returns that extension.
fn validate_chunk_set(
    chunks: &[ChunkName],
    count: u64,
) -> Result<Option<String>, TransferError> {
    if count == 0 {
        return Err(TransferError::EmptyUpload);
    }

    for pair in chunks.windows(2) {
        if pair[0].index == pair[1].index {
            return Err(TransferError::DuplicateChunkIndex {
                index: pair[0].index,
            });
        }
    }

    if let Some(last) = chunks.last() {
        if last.index >= count {
            return Err(TransferError::UnexpectedChunkIndex {
                index: last.index,
                count,
            });
        }
    }

    // Sorted, unique and bounded by count: any gap means fewer than count.
    if (chunks.len() as u64) != count {
        return Err(TransferError::IncompleteUpload {
            expected: count,
            stored: chunks.len() as u64,
            missing: missing_indices(chunks, count),
        });
    }

    let mut iter = chunks.iter();
    let first = iter.next().and_then(|c| c.extension.clone());
    for chunk in iter {
        if chunk.extension != first {
            return Err(TransferError::ExtensionMismatch {
                expected: first.unwrap_or_default(),
                found: chunk.extension.clone().unwrap_or_default(),
            });
        }
    }

    // Every chunk agrees, so this is also the last chunk's extension.
    Ok(first)
}

fn missing_indices(chunks: &[ChunkName], count: u64) -> Vec<u64> {
    let mut missing = Vec::new();
    let mut present = chunks.iter().map(|c| c.index).peekable();
    for i in 0..count {
        while present.next_if(|&idx| idx < i).is_some() {}
        if present.next_if_eq(&i).is_none() {
            missing.push(i);
            if missing.len() == MAX_REPORTED_MISSING {
                break;
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ChunkStore) {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        (dir, store)
    }

    async fn put(store: &ChunkStore, hash: &str, filename: &str, data: &[u8]) {
        store
            .write_chunk(hash, filename, &mut &data[..])
            .await
            .unwrap();
    }

    fn names(list: &[&str]) -> Vec<ChunkName> {
        let mut v: Vec<_> = list.iter().map(|n| ChunkName::parse(n).unwrap()).collect();
        v.sort_by_key(|n| n.index);
        v
    }

    #[tokio::test]
    async fn merges_in_index_order() {
        let (_dir, store) = store();
        put(&store, "h", "h_2.txt", b"C").await;
        put(&store, "h", "h_0.txt", b"A").await;
        put(&store, "h", "h_1.txt", b"B").await;

        let merged = merge_chunks(&store, "h", 3).await.unwrap();
        assert_eq!(merged.filename, "h.txt");
        assert_eq!(merged.extension.as_deref(), Some("txt"));
        assert_eq!(merged.size_bytes, 3);
        assert_eq!(merged.chunk_count, 3);
        assert_eq!(std::fs::read(&merged.path).unwrap(), b"ABC");
        assert!(!store.session_dir("h").exists());
    }

    #[tokio::test]
    async fn ten_chunks_sort_numerically() {
        let (_dir, store) = store();
        let mut expected = Vec::new();
        for i in (0..12u64).rev() {
            let byte = b'a' + i as u8;
            put(&store, "h", &ChunkName::format("h", i, Some("bin")), &[byte]).await;
        }
        for i in 0..12u8 {
            expected.push(b'a' + i);
        }
        let merged = merge_chunks(&store, "h", 12).await.unwrap();
        assert_eq!(std::fs::read(&merged.path).unwrap(), expected);
    }

    #[tokio::test]
    async fn no_extension_artifact() {
        let (_dir, store) = store();
        put(&store, "h", "h_0", b"x").await;
        let merged = merge_chunks(&store, "h", 1).await.unwrap();
        assert_eq!(merged.filename, "h");
        assert_eq!(merged.extension, None);
        assert_eq!(merged.path, store.root().join("h"));
        assert_eq!(std::fs::read(&merged.path).unwrap(), b"x");
        assert!(!store.session_dir("h").exists());
    }

    #[tokio::test]
    async fn extensionless_file_can_be_uploaded_again() {
        let (_dir, store) = store();
        put(&store, "h", "h_0", b"ab").await;
        put(&store, "h", "h_1", b"cd").await;
        let first = merge_chunks(&store, "h", 2).await.unwrap();
        assert!(first.path.is_file());

        // A second session for the same hash while the artifact is served.
        put(&store, "h", "h_0", b"ab").await;
        put(&store, "h", "h_1", b"cd").await;
        assert_eq!(std::fs::read(&first.path).unwrap(), b"abcd");

        let second = merge_chunks(&store, "h", 2).await.unwrap();
        assert_eq!(second.path, first.path);
        assert_eq!(std::fs::read(&second.path).unwrap(), b"abcd");
        assert!(!store.session_dir("h").exists());
    }

    #[tokio::test]
    async fn merge_truncates_existing_artifact() {
        let (_dir, store) = store();
        std::fs::write(store.root().join("h.txt"), b"much longer old content").unwrap();
        put(&store, "h", "h_0.txt", b"new").await;
        let merged = merge_chunks(&store, "h", 1).await.unwrap();
        assert_eq!(std::fs::read(&merged.path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn unknown_session() {
        let (_dir, store) = store();
        let err = merge_chunks(&store, "nope", 1).await.unwrap_err();
        assert!(matches!(err, TransferError::SessionNotFound(h) if h == "nope"));
    }

    #[tokio::test]
    async fn incomplete_leaves_directory() {
        let (_dir, store) = store();
        put(&store, "h", "h_0.txt", b"A").await;
        put(&store, "h", "h_2.txt", b"C").await;

        let err = merge_chunks(&store, "h", 4).await.unwrap_err();
        match err {
            TransferError::IncompleteUpload {
                expected,
                stored,
                missing,
            } => {
                assert_eq!(expected, 4);
                assert_eq!(stored, 2);
                assert_eq!(missing, vec![1, 3]);
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(store.list_chunks("h").await.unwrap().len(), 2);
        assert!(!store.root().join("h.txt").exists());
    }

    #[tokio::test]
    async fn zero_count_is_rejected() {
        let (_dir, store) = store();
        put(&store, "h", "h_0.txt", b"A").await;
        let err = merge_chunks(&store, "h", 0).await.unwrap_err();
        assert!(matches!(err, TransferError::EmptyUpload));
        assert!(store.chunk_exists("h", "h_0.txt").await.unwrap());
    }

    #[tokio::test]
    async fn gap_plus_duplicate_is_rejected() {
        let (_dir, store) = store();
        put(&store, "h", "h_0.txt", b"A").await;
        put(&store, "h", "h_0_copy.txt", b"A").await;
        put(&store, "h", "h_2.txt", b"C").await;

        let err = merge_chunks(&store, "h", 3).await.unwrap_err();
        assert!(matches!(err, TransferError::DuplicateChunkIndex { index: 0 }));
        assert_eq!(store.list_chunks("h").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn out_of_range_index_is_rejected() {
        let (_dir, store) = store();
        put(&store, "h", "h_0.txt", b"A").await;
        put(&store, "h", "h_5.txt", b"F").await;

        let err = merge_chunks(&store, "h", 2).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::UnexpectedChunkIndex { index: 5, count: 2 }
        ));
    }

    #[tokio::test]
    async fn mixed_extensions_are_rejected() {
        let (_dir, store) = store();
        put(&store, "h", "h_0.txt", b"A").await;
        put(&store, "h", "h_1.bin", b"B").await;

        let err = merge_chunks(&store, "h", 2).await.unwrap_err();
        match err {
            TransferError::ExtensionMismatch { expected, found } => {
                assert_eq!(expected, "txt");
                assert_eq!(found, "bin");
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(store.list_chunks("h").await.unwrap().len(), 2);
    }

    #[test]
    fn missing_indices_are_bounded() {
        let chunks = names(&["h_0", "h_3"]);
        assert_eq!(missing_indices(&chunks, 5), vec![1, 2, 4]);
        assert_eq!(missing_indices(&[], 100).len(), MAX_REPORTED_MISSING);
    }

    #[test]
    fn missing_indices_ignore_duplicates() {
        let chunks = names(&["h_0", "h_0x", "h_2"]);
        assert_eq!(missing_indices(&chunks, 3), vec![1]);
    }
}
