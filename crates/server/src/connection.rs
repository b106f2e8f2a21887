//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use chunkyard_protocol::constants::{
    ERR_CODE_BAD_REQUEST, ERR_CODE_NOT_IMPLEMENTED, MessageType, WS_MAX_MESSAGE_SIZE,
    WS_PING_PERIOD, WS_PONG_WAIT,
};
use chunkyard_protocol::{BinaryMessage, Envelope, Message, parse_binary_message};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Handle for sending replies to one client.
///
/// Cloneable and cheap, wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a reply [`Envelope`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the client disconnected.
    pub fn send_envelope(&self, envelope: Envelope) -> Result<(), SendError> {
        let json = serde_json::to_string(&envelope).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!(id = %envelope.id, "send buffer full or closed, dropping reply");
            SendError
        })
    }

    /// Sends a failure reply for request `id`.
    pub fn send_error(&self, id: &str, code: i32, message: &str) -> Result<(), SendError> {
        self.send_envelope(Envelope::failure(id, code, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to a client.
///
/// Owns the read/write pump tasks.
pub struct ClientConnection {
    pub peer_addr: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Returns `true` while the pumps are running.
    pub fn is_alive(&self) -> bool {
        self.sender.is_connected() && !self.cancel.is_cancelled()
    }

    /// Signals the pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tokio tasks and stop when the connection is
/// closed or the server token is cancelled.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    server_cancel: CancellationToken,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let conn = ClientConnection {
        peer_addr,
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    // Write pump.
    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    // Read pump.
    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, sender, handler.clone(), read_cancel.clone()).await;
        // When read pump exits, cancel the write pump too.
        read_cancel.cancel();
        handler.on_disconnected().await;
        tracing::info!(%peer_addr, "client disconnected");
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and spawns one task per request.
///
/// The read deadline is reset by any inbound frame, so a client that is busy
/// streaming chunks is never timed out.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = &mut deadline => {
                tracing::warn!("read deadline exceeded, closing connection");
                break;
            }

            frame = stream.next() => {
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                match frame {
                    Some(Ok(ws_msg)) => match ws_msg {
                        WsMessage::Text(text) => {
                            if text.len() > WS_MAX_MESSAGE_SIZE {
                                tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                                continue;
                            }
                            let handler = handler.clone();
                            let sender = sender.clone();
                            tokio::spawn(async move {
                                dispatch_text(&handler, sender, text.as_str()).await;
                            });
                        }
                        WsMessage::Binary(data) => {
                            if data.len() > WS_MAX_MESSAGE_SIZE {
                                tracing::error!("binary message exceeds max size ({} > {})", data.len(), WS_MAX_MESSAGE_SIZE);
                                continue;
                            }
                            let handler = handler.clone();
                            let sender = sender.clone();
                            tokio::spawn(async move {
                                dispatch_binary(&handler, sender, &data).await;
                            });
                        }
                        WsMessage::Pong(_) => {}
                        WsMessage::Ping(data) => {
                            let _ = sender.tx.try_send(WsMessage::Pong(data));
                        }
                        WsMessage::Close(_) => {
                            tracing::info!("received close frame");
                            break;
                        }
                        WsMessage::Frame(_) => {} // Raw frames ignored.
                    },
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Dispatches a text (JSON) request to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("invalid request JSON: {e}");
            let _ = sender.send_error(&request_id(text), ERR_CODE_BAD_REQUEST, "malformed request");
            return;
        }
    };

    match msg.msg_type {
        MessageType::Ping => handler.on_ping(sender, msg).await,
        MessageType::UploadAlready => handler.on_upload_already(sender, msg).await,
        MessageType::UploadMerge => handler.on_upload_merge(sender, msg).await,
        MessageType::UploadBase64 => handler.on_upload_base64(sender, msg).await,
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg.id, ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}

/// Dispatches a binary WebSocket frame to the appropriate handler method.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: Sender, data: &[u8]) {
    match parse_binary_message(data) {
        Ok(BinaryMessage { header, data }) => match header.msg_type {
            MessageType::UploadChunk => handler.on_upload_chunk(sender, header, data).await,
            MessageType::Upload => handler.on_upload(sender, header, data).await,
            _ => {
                tracing::warn!(msg_type = ?header.msg_type, "unhandled binary message type");
                let _ = sender.send_error(&header.id, ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
            }
        },
        Err(e) => {
            tracing::warn!("failed to parse binary message: {e}");
            let _ = sender.send_error("", ERR_CODE_BAD_REQUEST, &format!("malformed binary frame: {e}"));
        }
    }
}

#[cfg(test)]
pub(crate) fn test_sender() -> (Sender, mpsc::Receiver<WsMessage>) {
    let (tx, rx) = mpsc::channel(64);
    (Sender { tx }, rx)
}

/// Best-effort extraction of the `id` of a request that failed to parse.
fn request_id(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_owned))
        .unwrap_or_default()
}
