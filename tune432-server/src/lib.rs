//! HTTP service for the tune432 conversion pipeline.
//!
//! Exposes the router and shared state so the binary and the integration
//! tests build the exact same service.

pub mod api;
pub mod config;
pub mod error;
pub mod sweeper;

pub use crate::config::ServerConfig;
pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::trace::TraceLayer;
use tune432::{ArtifactStore, ConversionPipeline};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: ConversionPipeline,
    pub config: Arc<ServerConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: Instant,
}

impl AppState {
    pub fn new(pipeline: ConversionPipeline, config: ServerConfig) -> Self {
        Self {
            pipeline,
            config: Arc::new(config),
            startup_time: Instant::now(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        self.pipeline.store()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.cors_layer();

    Router::new()
        .nest("/api", api::api_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
