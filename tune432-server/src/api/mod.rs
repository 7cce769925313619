//! HTTP API handlers

pub mod convert;
pub mod files;
pub mod health;

use axum::http::{header, HeaderMap};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::config::ServerConfig;
use crate::AppState;

pub use health::health_routes;

/// Routes mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/convert", post(convert::convert))
        .route("/info", get(convert::info))
        .route("/listen/:job_id", get(files::listen))
        .route("/download/:job_id", get(files::download))
        .route("/share/:job_id", get(files::share))
        .route("/cleanup/:job_id", delete(files::cleanup))
}

/// Scheme and authority that returned links start with.
pub(crate) fn base_url(config: &ServerConfig, headers: &HeaderMap) -> String {
    if let Some(url) = &config.public_url {
        return url.clone();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|p| matches!(*p, "http" | "https"))
        .unwrap_or("http");
    format!("{scheme}://{host}")
}
