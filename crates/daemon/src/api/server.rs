/// API Server implementation

use super::handlers::*;
use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use xpanel_core::Panel;

/// Build the router with all endpoints
pub fn router(panel: Arc<Panel>) -> Router {
    let state = AppState { panel };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // User endpoints
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/stats", get(user_stats))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/users/:id/reset-usage", post(reset_user_usage))
        // Subscription endpoints
        .route("/api/subscriptions/:id", get(get_subscription))
        .route("/api/subscriptions/:id/:dialect", get(get_subscription_link))
        // Credential endpoints
        .route("/api/credentials", get(get_credentials))
        .route("/api/credentials/rotate", post(rotate_credentials))
        .route("/api/credentials/destination", put(set_destination))
        .route("/api/credentials/server-names", put(set_server_names))
        .route("/api/credentials/address", put(set_address))
        // Engine endpoints
        .route("/api/config", get(get_config))
        .route("/api/sync", post(resync))
        .route("/api/status", get(get_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Admin API server for the panel
pub struct ApiServer {
    listen_addr: SocketAddr,
    panel: Arc<Panel>,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(listen_addr: SocketAddr, panel: Arc<Panel>, shutdown: CancellationToken) -> Self {
        Self {
            listen_addr,
            panel,
            shutdown,
        }
    }

    /// Serve until the shutdown token fires
    pub async fn start(self) -> Result<()> {
        let app = router(self.panel);

        info!("API server starting on {}", self.listen_addr);
        if !self.listen_addr.ip().is_loopback() {
            warn!(
                "API server bound to non-loopback address {}; it has no authentication",
                self.listen_addr
            );
        }

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        let shutdown = self.shutdown;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

        info!("API server stopped");
        Ok(())
    }
}
