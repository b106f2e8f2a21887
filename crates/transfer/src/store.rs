use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

use crate::TransferError;
use crate::naming::{ChunkName, artifact_filename, validate_hash};
use crate::types::WrittenChunk;

/// Directory under the upload root holding one staging directory per
/// session. Hashes never start with `.`, so it cannot collide with an
/// artifact.
pub const STAGING_DIR: &str = ".chunks";

/// Per-hash staging directories for in-flight chunks, plus the merged
/// artifacts.
///
/// Layout:
/// - `<root>/.chunks/<hash>/<chunk filename>` while a session is uploading
/// - `<root>/<hash>[.<ext>]` once merged (or uploaded whole)
///
/// Staging lives in its own namespace so an extensionless artifact
/// `<root>/<hash>` and an open session of the same hash can coexist.
///
/// Chunks are published with a hard link. On filesystems without hard links
/// (FAT/exFAT, some network mounts) the store falls back to an exclusive
/// create of the final name, which keeps write-once semantics but not
/// all-or-nothing content.
///
/// The store does no locking of its own; callers serialize operations on
/// one hash (see [`crate::SessionLocks`]).
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root directory if it does not exist.
    pub async fn ensure_root(&self) -> Result<(), TransferError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Returns the upload root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the staging directory of a session.
    pub fn session_dir(&self, hash: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(hash)
    }

    /// Returns the final location of an artifact.
    pub fn artifact_path(&self, hash: &str, extension: Option<&str>) -> PathBuf {
        self.root.join(artifact_filename(hash, extension))
    }

    /// Returns `true` if a staging directory exists for `hash`.
    pub async fn session_exists(&self, hash: &str) -> Result<bool, TransferError> {
        validate_hash(hash)?;
        match fs::metadata(self.session_dir(hash)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the chunk filenames stored for `hash`, sorted by index.
    ///
    /// An unknown hash yields an empty list.
    pub async fn list_chunks(&self, hash: &str) -> Result<Vec<String>, TransferError> {
        Ok(self
            .list_chunk_names(hash)
            .await?
            .into_iter()
            .map(|n| n.filename)
            .collect())
    }

    /// Lists the parsed chunk names stored for `hash`, sorted by index
    /// (ties broken by filename).
    ///
    /// Entries that are not regular files, or whose name does not parse to
    /// this session's hash (such as in-flight temporary files), are skipped.
    pub async fn list_chunk_names(&self, hash: &str) -> Result<Vec<ChunkName>, TransferError> {
        validate_hash(hash)?;

        let mut entries = match fs::read_dir(self.session_dir(hash)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            match ChunkName::parse(file_name) {
                Ok(name) if name.hash == hash => names.push(name),
                _ => debug!(hash = %hash, file = %file_name, "skipping non-chunk entry"),
            }
        }

        names.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.filename.cmp(&b.filename)));
        Ok(names)
    }

    /// Returns `true` if `filename` is stored in the session of `hash`.
    pub async fn chunk_exists(&self, hash: &str, filename: &str) -> Result<bool, TransferError> {
        validate_hash(hash)?;
        validate_file_component(filename)?;
        Ok(fs::try_exists(self.session_dir(hash).join(filename)).await?)
    }

    /// Streams `source` into the session of `hash` under `filename`.
    ///
    /// The bytes go to a hidden temporary file first and are published with
    /// an exclusive hard link, so the chunk is either complete or absent and
    /// at most one writer wins for a given name. The temporary file is
    /// always removed.
    pub async fn write_chunk<R>(
        &self,
        hash: &str,
        filename: &str,
        source: &mut R,
    ) -> Result<WrittenChunk, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        validate_hash(hash)?;
        let name = ChunkName::parse(filename)?;
        if name.hash != hash {
            return Err(TransferError::InvalidFilename(format!(
                "chunk {filename} does not belong to session {hash}"
            )));
        }

        let dir = self.session_dir(hash);
        fs::create_dir_all(&dir).await?;

        let dest = dir.join(filename);
        if fs::try_exists(&dest).await? {
            return Err(TransferError::ChunkAlreadyExists(filename.to_string()));
        }

        let tmp = dir.join(temp_name(filename));
        let result: Result<u64, TransferError> = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)
                .await?;
            let size = tokio::io::copy(source, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            match fs::hard_link(&tmp, &dest).await {
                Ok(()) => Ok(size),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    Err(TransferError::ChunkAlreadyExists(filename.to_string()))
                }
                Err(e) if link_unsupported(&e) => {
                    debug!(error = %e, "hard links unavailable, copying chunk into place");
                    copy_exclusive(&tmp, &dest, filename).await?;
                    Ok(size)
                }
                Err(e) => Err(e.into()),
            }
        }
        .await;

        remove_temp(&tmp).await;
        let size_bytes = result?;

        debug!(hash = %hash, index = name.index, bytes = size_bytes, "chunk written");
        Ok(WrittenChunk {
            name,
            path: dest,
            size_bytes,
        })
    }

    /// Removes the staging directory of `hash` and anything left in it.
    ///
    /// A missing directory is not an error.
    pub async fn remove_session_directory(&self, hash: &str) -> Result<(), TransferError> {
        validate_hash(hash)?;
        match fs::remove_dir_all(self.session_dir(hash)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a whole-file artifact at `<root>/<hash>[.<ext>]`, replacing any
    /// previous content.
    pub async fn write_artifact(
        &self,
        hash: &str,
        extension: Option<&str>,
        data: &[u8],
    ) -> Result<PathBuf, TransferError> {
        validate_hash(hash)?;
        self.ensure_root().await?;

        let dest = self.artifact_path(hash, extension);
        let tmp = self.root.join(temp_name(hash));

        let result: Result<(), TransferError> = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &dest).await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            remove_temp(&tmp).await;
        }
        result?;
        Ok(dest)
    }

    /// Returns `path` relative to the upload root, `/`-separated.
    ///
    /// Returns `None` for paths outside the root.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| match c {
                Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }
}

fn temp_name(base: &str) -> String {
    format!(".{base}.{}.part", uuid::Uuid::new_v4().simple())
}

async fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temporary file");
        }
    }
}

/// Errors from `hard_link` meaning the filesystem cannot link at all.
/// Linux vfat reports `EPERM`.
fn link_unsupported(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Unsupported | ErrorKind::PermissionDenied
    )
}

/// Copies `src` to a new file `dest`, failing if `dest` exists.
///
/// A partially copied `dest` is removed again.
async fn copy_exclusive(src: &Path, dest: &Path, filename: &str) -> Result<(), TransferError> {
    let mut out = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await
    {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(TransferError::ChunkAlreadyExists(filename.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let copied: std::io::Result<()> = async {
        let mut input = fs::File::open(src).await?;
        tokio::io::copy(&mut input, &mut out).await?;
        out.flush().await?;
        out.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        drop(out);
        remove_temp(dest).await;
        return Err(e.into());
    }
    Ok(())
}

fn validate_file_component(filename: &str) -> Result<(), TransferError> {
    if filename.is_empty() || filename == "." || filename == ".." {
        return Err(TransferError::InvalidFilename(format!(
            "not a file name: {filename:?}"
        )));
    }
    if filename.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidFilename(format!(
            "path separators not allowed: {filename}"
        )));
    }
    Ok(())
}
