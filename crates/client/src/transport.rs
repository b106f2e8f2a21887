//! The request surface the uploader needs from a server connection.

use std::future::Future;
use std::pin::Pin;

use chunkyard_protocol::constants::MessageType;
use chunkyard_protocol::{
    Envelope, MergedFile, UploadAlreadyRequest, UploadAlreadyResponse, UploadMergeRequest,
    UploadedFile,
};

use crate::ClientError;
use crate::ws_client::WsClient;

/// A boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Upload operations against a server.
///
/// Implemented by [`WsClient`]; tests substitute an in-process transport.
pub trait UploadTransport: Send + Sync {
    /// Filenames of chunks the server already stores for `hash`.
    fn probe(&self, hash: &str) -> TransportFuture<'_, Vec<String>>;

    /// Uploads one chunk named `<hash>_<index>[.<ext>]`.
    fn upload_chunk<'a>(&'a self, filename: &'a str, data: &'a [u8])
    -> TransportFuture<'a, UploadedFile>;

    /// Uploads a complete file in one request.
    fn upload_file<'a>(&'a self, filename: &'a str, data: &'a [u8])
    -> TransportFuture<'a, UploadedFile>;

    /// Asks the server to reassemble `count` chunks of `hash`.
    fn merge(&self, hash: &str, count: u64) -> TransportFuture<'_, MergedFile>;
}

fn reply_data<T: for<'de> serde::Deserialize<'de>>(reply: Envelope) -> Result<T, ClientError> {
    reply.parse_data::<T>()?.ok_or(ClientError::MissingData)
}

impl UploadTransport for WsClient {
    fn probe(&self, hash: &str) -> TransportFuture<'_, Vec<String>> {
        let req = UploadAlreadyRequest {
            hash: hash.to_string(),
        };
        Box::pin(async move {
            let reply = self
                .send_request(MessageType::UploadAlready, Some(&req))
                .await?;
            Ok(reply_data::<UploadAlreadyResponse>(reply)?.file_list)
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        filename: &'a str,
        data: &'a [u8],
    ) -> TransportFuture<'a, UploadedFile> {
        Box::pin(async move {
            let reply = self
                .send_binary(MessageType::UploadChunk, filename, data)
                .await?;
            reply_data(reply)
        })
    }

    fn upload_file<'a>(
        &'a self,
        filename: &'a str,
        data: &'a [u8],
    ) -> TransportFuture<'a, UploadedFile> {
        Box::pin(async move {
            let reply = self.send_binary(MessageType::Upload, filename, data).await?;
            reply_data(reply)
        })
    }

    fn merge(&self, hash: &str, count: u64) -> TransportFuture<'_, MergedFile> {
        let req = UploadMergeRequest {
            hash: hash.to_string(),
            count,
        };
        Box::pin(async move {
            let reply = self
                .send_request(MessageType::UploadMerge, Some(&req))
                .await?;
            reply_data(reply)
        })
    }
}
