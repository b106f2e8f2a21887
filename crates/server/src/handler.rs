//! Handler trait for processing upload requests.
//!
//! Implementors provide the storage logic while the server framework
//! handles connection management, routing, and the binary protocol.

use std::future::Future;
use std::pin::Pin;

use chunkyard_protocol::constants::ERR_CODE_NOT_IMPLEMENTED;
use chunkyard_protocol::{BinaryHeader, Envelope, Message};

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling requests from an upload client.
///
/// Every method receives a `sender` for the reply and the parsed request.
/// Each request runs on its own task, so methods may be invoked
/// concurrently for the same connection.
///
/// Default implementations reply with "not implemented" so handlers only
/// need to override the request types they care about.
pub trait Handler: Send + Sync + 'static {
    /// Called for `ping`.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply("pong", Option::<&()>::None) {
                let _ = sender.send_envelope(reply);
            }
        })
    }

    /// Called for `upload_already` (probe existing chunks).
    fn on_upload_already(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `upload_merge`.
    fn on_upload_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `upload_base64`.
    fn on_upload_base64(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for binary `upload_chunk` frames.
    fn on_upload_chunk(
        &self,
        sender: Sender,
        header: BinaryHeader,
        _data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&header.id, ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for binary `upload` (whole file) frames.
    fn on_upload(&self, sender: Sender, header: BinaryHeader, _data: Vec<u8>) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&header.id, ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called once when a connection's read pump exits.
    fn on_disconnected(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}

/// Sends `reply`, logging if the connection is already gone.
pub(crate) fn deliver(sender: &Sender, reply: Envelope) {
    if sender.send_envelope(reply).is_err() {
        tracing::debug!("client gone before reply could be sent");
    }
}
