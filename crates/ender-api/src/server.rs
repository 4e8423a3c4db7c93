//! HTTP server lifecycle

use axum::Router;

use crate::error::{ApiError, Result};

/// Binds the listen port and serves the router until a shutdown signal.
pub struct ApiServer {
    port: u16,
    router: Router,
}

impl ApiServer {
    pub fn new(port: u16, router: Router) -> Self {
        Self { port, router }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| ApiError::Internal(format!("failed to bind port {}: {e}", self.port)))?;

        tracing::info!(port = self.port, "http server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApiError::Internal(format!("server error: {e}")))
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install shutdown signal handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
