use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::errors::{EncryptionError, Result};

use super::routes::{build_router, LivenessState};

/// Serve the liveness endpoints until `shutdown` fires.
pub async fn start_liveness_server(
    config: &ServerConfig,
    state: LivenessState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| EncryptionError::config(format!("Invalid liveness address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| EncryptionError::io(format!("Failed to bind liveness server on {}", addr), e))?;

    info!(address = %addr, "Starting liveness server");
    run_http_server(listener, build_router(state), shutdown).await?;
    info!("Liveness server shutdown completed");
    Ok(())
}

async fn run_http_server(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| EncryptionError::io("Liveness server error", e))
}
