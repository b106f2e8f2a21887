//! [`Handler`] implementation backed by an [`UploadService`].

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use chunkyard_protocol::constants::{
    DEFAULT_CHUNK_SIZE, ERR_CODE_BAD_REQUEST, ERR_CODE_CONFLICT, ERR_CODE_INTERNAL, ERR_CODE_NOT_FOUND,
    ERR_CODE_UNPROCESSABLE,
};
use chunkyard_protocol::{
    BinaryHeader, Envelope, MergedFile, Message, ServerInfo, UploadAlreadyRequest,
    UploadAlreadyResponse, UploadBase64Request, UploadMergeRequest, UploadedFile,
};
use chunkyard_transfer::{StoredFile, TransferError, UploadService};

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture, deliver};

const OK_MESSAGE: &str = "success";
const MERGE_CODE_TEXT: &str = "merge success";
const PONG: &str = "pong";

/// Maps a core error to its wire code.
pub fn error_code(err: &TransferError) -> i32 {
    match err {
        TransferError::InvalidFilename(_) => ERR_CODE_BAD_REQUEST,
        TransferError::SessionNotFound(_) => ERR_CODE_NOT_FOUND,
        TransferError::ChunkAlreadyExists(_) => ERR_CODE_CONFLICT,
        TransferError::IncompleteUpload { .. }
        | TransferError::EmptyUpload
        | TransferError::DuplicateChunkIndex { .. }
        | TransferError::UnexpectedChunkIndex { .. }
        | TransferError::ExtensionMismatch { .. } => ERR_CODE_UNPROCESSABLE,
        TransferError::Io(_) => ERR_CODE_INTERNAL,
    }
}

/// Serves upload requests from an [`UploadService`].
///
/// Stored paths are reported as URLs under `public_url`, which is expected
/// to serve the upload root as static files. The chunk size is advertised
/// in the `ping` reply.
pub struct UploadHandler {
    service: Arc<UploadService>,
    public_url: String,
    chunk_size: usize,
}

impl UploadHandler {
    pub fn new(service: Arc<UploadService>, public_url: impl Into<String>) -> Self {
        let public_url = public_url.into().trim_end_matches('/').to_string();
        Self {
            service,
            public_url,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn service(&self) -> &Arc<UploadService> {
        &self.service
    }

    /// Public URL of a stored path.
    pub fn service_path(&self, path: &Path) -> String {
        let rel = self.service.store().relative_path(path).unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        format!("{}/{}", self.public_url, rel)
    }

    fn stored_reply(&self, id: &str, result: Result<StoredFile, TransferError>) -> Envelope {
        match result {
            Ok(stored) => {
                let data = UploadedFile {
                    service_path: self.service_path(&stored.stored_path),
                    original_filename: stored.original_filename,
                };
                success(id, &data)
            }
            Err(e) => failure(id, &e),
        }
    }
}

impl Handler for UploadHandler {
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let info = ServerInfo {
                chunk_size: self.chunk_size,
            };
            let reply = Envelope::success(&msg.id, PONG, Some(&info))
                .unwrap_or_else(|e| Envelope::failure(&msg.id, ERR_CODE_INTERNAL, e.to_string()));
            deliver(&sender, reply);
        })
    }

    fn on_upload_already(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: UploadAlreadyRequest = match payload(&msg) {
                Ok(r) => r,
                Err(reply) => return deliver(&sender, reply),
            };
            let file_list = self.service.probe_existing(&req.hash).await;
            deliver(&sender, success(&msg.id, &UploadAlreadyResponse { file_list }));
        })
    }

    fn on_upload_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: UploadMergeRequest = match payload(&msg) {
                Ok(r) => r,
                Err(reply) => return deliver(&sender, reply),
            };
            let reply = match self.service.merge(&req.hash, req.count).await {
                Ok(artifact) => {
                    let data = MergedFile {
                        code_text: MERGE_CODE_TEXT.to_string(),
                        service_path: self.service_path(&artifact.path),
                        original_filename: artifact.filename,
                    };
                    success(&msg.id, &data)
                }
                Err(e) => failure(&msg.id, &e),
            };
            deliver(&sender, reply);
        })
    }

    fn on_upload_base64(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: UploadBase64Request = match payload(&msg) {
                Ok(r) => r,
                Err(reply) => return deliver(&sender, reply),
            };
            let bytes = match req.decode() {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(file = %req.filename, "rejecting base64 upload: {e}");
                    return deliver(&sender, msg.reply_error(ERR_CODE_BAD_REQUEST, e.to_string()));
                }
            };
            let result = self.service.accept_whole_file(&bytes, &req.filename).await;
            deliver(&sender, self.stored_reply(&msg.id, result));
        })
    }

    fn on_upload_chunk(
        &self,
        sender: Sender,
        header: BinaryHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            let result = self
                .service
                .accept_chunk(&header.filename, &mut data.as_slice())
                .await;
            deliver(&sender, self.stored_reply(&header.id, result));
        })
    }

    fn on_upload(&self, sender: Sender, header: BinaryHeader, data: Vec<u8>) -> HandlerFuture<'_> {
        Box::pin(async move {
            let result = self.service.accept_whole_file(&data, &header.filename).await;
            deliver(&sender, self.stored_reply(&header.id, result));
        })
    }
}

/// Parses the request payload, or builds the 400 reply.
fn payload<T: DeserializeOwned>(msg: &Message) -> Result<T, Envelope> {
    match msg.parse_payload::<T>() {
        Ok(Some(p)) => Ok(p),
        Ok(None) => Err(msg.reply_error(ERR_CODE_BAD_REQUEST, "missing payload")),
        Err(e) => {
            tracing::warn!(id = %msg.id, msg_type = ?msg.msg_type, "invalid payload: {e}");
            Err(msg.reply_error(ERR_CODE_BAD_REQUEST, format!("invalid payload: {e}")))
        }
    }
}

fn success<T: Serialize>(id: &str, data: &T) -> Envelope {
    Envelope::success(id, OK_MESSAGE, Some(data))
        .unwrap_or_else(|e| Envelope::failure(id, ERR_CODE_INTERNAL, e.to_string()))
}

fn failure(id: &str, err: &TransferError) -> Envelope {
    Envelope::failure(id, error_code(err), err.to_string())
}
