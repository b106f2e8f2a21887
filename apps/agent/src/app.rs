//! Application orchestrator: wires the store, service and server together.

use std::sync::Arc;

use chunkyard_server::{ServerConfig, UploadHandler, UploadServer};
use chunkyard_transfer::{ChunkStore, UploadService};

use crate::config::Config;

/// Runs the agent until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = build(&config).await?;

    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tracing::info!(
        bind = %config.bind_address,
        port = config.port,
        public_url = %config.public_url,
        chunk_size = config.default_chunk_size,
        "agent ready"
    );

    tokio::select! {
        result = &mut server_task => {
            // The server only returns on its own when it failed to start.
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
            server.shutdown();
            server_task.await??;
        }
    }

    Ok(())
}

/// Prepares the upload root and builds the server (not yet listening).
async fn build(config: &Config) -> anyhow::Result<Arc<UploadServer<UploadHandler>>> {
    let store = ChunkStore::new(&config.upload_dir);
    store.ensure_root().await?;

    let service = Arc::new(UploadService::new(store));
    let handler = UploadHandler::new(service, config.public_url.clone())
        .with_chunk_size(config.default_chunk_size);

    let server_config = ServerConfig {
        bind_address: config.bind_address,
        port: config.port,
    };
    Ok(UploadServer::new(server_config, handler))
}
