mod error;
mod handlers;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::signal;

use crate::error::{AppError, Result};
use crate::pipeline::Pipeline;

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/channel",
            get(handlers::get_channel).post(handlers::post_channel),
        )
        .route("/api/channels", get(handlers::list_channels))
        .route("/api/videos/{id}", get(handlers::get_video))
        .route("/api/transcript", get(handlers::transcript_by_url))
        .route("/api/transcript/{video_id}", get(handlers::transcript_by_id))
        .route("/api/prompt/{video_id}", get(handlers::prompt))
        .route("/api/history/recent", get(handlers::recent_history))
        .route("/api/history/favorites", get(handlers::favorite_history))
        .route("/api/history/search", get(handlers::search_history))
        .route("/api/history/{id}/favorite", post(handlers::toggle_favorite))
        .with_state(state)
}

/// Serves the API until Ctrl+C.
pub async fn serve(pipeline: Arc<Pipeline>, host: &str, port: u16) -> Result<()> {
    let ip: IpAddr = host
        .parse()
        .map_err(|e| AppError::Config(format!("invalid listen host {}: {}", host, e)))?;
    let addr = SocketAddr::new(ip, port);

    let app = router(AppState { pipeline });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
}
