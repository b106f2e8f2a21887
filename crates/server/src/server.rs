//! Upload WebSocket server.
//!
//! Listens on a TCP port, upgrades every connection to WebSocket and
//! serves any number of clients concurrently.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use chunkyard_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::ServerError;
use crate::connection::{self, ClientConnection};
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

/// The upload WebSocket server.
///
/// Dispatches requests from every connected client to the provided
/// [`Handler`].
pub struct UploadServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    connections: Mutex<Vec<ClientConnection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> UploadServer<H> {
    /// Creates a new server with the given handler.
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Self::with_shared_handler(config, Arc::new(handler))
    }

    /// Creates a new server around a handler the caller keeps a handle to.
    pub fn with_shared_handler(config: ServerConfig, handler: Arc<H>) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler,
            connections: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Returns the number of live client connections.
    pub async fn connection_count(&self) -> usize {
        let mut lock = self.connections.lock().await;
        lock.retain(ClientConnection::is_alive);
        lock.len()
    }

    /// Gracefully shuts down the server and every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener until cancellation.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("upload server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.close_all().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn close_all(&self) {
        let mut lock = self.connections.lock().await;
        for conn in lock.drain(..) {
            conn.close();
        }
    }

    /// Handles a single TCP connection: upgrades to WS and starts the pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        if self.cancel.is_cancelled() {
            return Err(ServerError::ShuttingDown);
        }

        // WebSocket upgrade with size limits matching our protocol constants.
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        tracing::info!(%peer_addr, "WebSocket connection established");

        let conn = connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.handler),
            self.cancel.clone(),
        );

        let mut lock = self.connections.lock().await;
        lock.retain(ClientConnection::is_alive);
        lock.push(conn);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerFuture;
    use chunkyard_protocol::{BinaryHeader, Envelope, Message, MessageType, encode_binary_message};
    use futures_util::{SinkExt, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    /// Counts chunk frames and replies with success.
    #[derive(Default)]
    struct TestHandler {
        chunks: AtomicUsize,
    }

    impl Handler for TestHandler {
        fn on_upload_chunk(
            &self,
            sender: connection::Sender,
            header: BinaryHeader,
            data: Vec<u8>,
        ) -> HandlerFuture<'_> {
            self.chunks.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let reply =
                    Envelope::success(&header.id, format!("{} bytes", data.len()), Option::<&()>::None)
                        .unwrap();
                let _ = sender.send_envelope(reply);
            })
        }
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        }
    }

    async fn start(
        handler: TestHandler,
    ) -> (Arc<UploadServer<TestHandler>>, tokio::task::JoinHandle<()>, u16) {
        let server = UploadServer::new(local_config(), handler);
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        let mut port = 0;
        for _ in 0..50 {
            port = server.port().await;
            if port > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        (server, handle, port)
    }

    async fn next_envelope<S>(ws: &mut S) -> Envelope
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let (server, handle, port) = start(TestHandler::default()).await;
        assert!(port > 0, "should have bound to a dynamic port");
        assert_eq!(server.connection_count().await, 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_accepts_multiple_clients() {
        let (server, handle, port) = start(TestHandler::default()).await;
        let url = format!("ws://127.0.0.1:{port}");

        let (_ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (_ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(server.connection_count().await, 2);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let (server, handle, port) = start(TestHandler::default()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .unwrap();

        let msg = Message::new::<()>("p-1", MessageType::Ping, None).unwrap();
        ws.send(WsMessage::Text(serde_json::to_string(&msg).unwrap().into()))
            .await
            .unwrap();

        let env = next_envelope(&mut ws).await;
        assert_eq!(env.id, "p-1");
        assert!(env.success);
        assert_eq!(env.code, 0);
        assert_eq!(env.message, "pong");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_type_gets_501_and_malformed_gets_400() {
        let (server, handle, port) = start(TestHandler::default()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .unwrap();

        let unknown = serde_json::json!({"id": "u-1", "type": "delete_everything"});
        ws.send(WsMessage::Text(unknown.to_string().into()))
            .await
            .unwrap();
        let env = next_envelope(&mut ws).await;
        assert_eq!(env.id, "u-1");
        assert_eq!(env.code, 501);
        assert!(!env.success);

        ws.send(WsMessage::Text("{not json".to_string().into())).await.unwrap();
        let env = next_envelope(&mut ws).await;
        assert_eq!(env.code, 400);

        // Default handler methods reply 501.
        let merge = serde_json::json!({"id": "m-1", "type": "upload_merge", "payload": {"HASH": "h", "count": 1}});
        ws.send(WsMessage::Text(merge.to_string().into()))
            .await
            .unwrap();
        let env = next_envelope(&mut ws).await;
        assert_eq!(env.id, "m-1");
        assert_eq!(env.code, 501);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn binary_frames_are_dispatched() {
        let (server, handle, port) = start(TestHandler::default()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .unwrap();

        for i in 0..3 {
            let header = BinaryHeader {
                id: format!("c-{i}"),
                msg_type: MessageType::UploadChunk,
                filename: format!("h_{i}.bin"),
            };
            let frame = encode_binary_message(&header, b"abcd").unwrap();
            ws.send(WsMessage::Binary(frame.into())).await.unwrap();
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            let env = next_envelope(&mut ws).await;
            assert!(env.success);
            assert_eq!(env.message, "4 bytes");
            ids.push(env.id);
        }
        ids.sort();
        assert_eq!(ids, vec!["c-0", "c-1", "c-2"]);

        // Truncated frame.
        ws.send(WsMessage::Binary(vec![0u8, 0, 0, 9, b'{'].into()))
            .await
            .unwrap();
        let env = next_envelope(&mut ws).await;
        assert_eq!(env.code, 400);

        server.shutdown();
        handle.await.unwrap();
    }
}
