use std::net::SocketAddr;
use std::time::Duration;

use axum::http::header::InvalidHeaderValue;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tune432::DownloadPolicy;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:3000";

/// HTTP-facing settings, separate from the pipeline's own configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Base URL used in returned links. Falls back to the request `Host`.
    pub public_url: Option<String>,
    /// Single allowed CORS origin; any origin when unset.
    pub allowed_origin: Option<HeaderValue>,
    pub download_policy: DownloadPolicy,
    /// How often the retention sweep runs.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            public_url: None,
            allowed_origin: None,
            download_policy: DownloadPolicy::default(),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    pub fn public_url(mut self, url: Option<String>) -> Self {
        self.public_url = url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        self
    }

    /// Restrict CORS to `origin`. `*` keeps the permissive default.
    pub fn allowed_origin(mut self, origin: &str) -> Result<Self, InvalidHeaderValue> {
        let origin = origin.trim();
        self.allowed_origin = if origin.is_empty() || origin == "*" {
            None
        } else {
            Some(HeaderValue::from_str(origin)?)
        };
        Ok(self)
    }

    pub fn download_policy(mut self, policy: DownloadPolicy) -> Self {
        self.download_policy = policy;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_secs(1));
        self
    }

    pub(crate) fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        match &self.allowed_origin {
            Some(origin) => layer.allow_origin(origin.clone()),
            None => layer.allow_origin(Any),
        }
    }
}
