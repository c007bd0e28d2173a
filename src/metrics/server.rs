//! HTTP endpoint for the rig's Prometheus metrics.

use super::{MetricsRegistry, MetricsSnapshot};
use crate::calibration::CalibrationStore;
use crate::settings::CameraSettings;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Errors that can occur while serving metrics.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind metrics listener: {0}")]
    Bind(#[from] std::io::Error),

    /// The server stopped with an error.
    #[error("metrics server error: {0}")]
    Server(String),
}

/// Where the metrics server listens.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    /// Listens on all interfaces at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// Registry plus the latest snapshot, shared with request handlers.
pub struct MetricsState {
    registry: MetricsRegistry,
    calibrated: bool,
}

impl MetricsState {
    /// Pushes a snapshot of the rig into the registry.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.calibrated = snapshot.is_calibrated;
    }
}

/// Serves `/metrics` and a calibration-aware `/health`.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Arc<RwLock<MetricsState>>,
}

impl MetricsServer {
    /// Creates a server reporting the camera as uncalibrated until updated.
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                calibrated: false,
            })),
        }
    }

    /// Handle for pushing snapshots while the server runs.
    pub fn state(&self) -> Arc<RwLock<MetricsState>> {
        Arc::clone(&self.state)
    }

    /// Re-reads the calibration file into the served state every `period`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_store(
        &self,
        store: CalibrationStore,
        settings: CameraSettings,
        period: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let state = self.state();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let snapshot = MetricsSnapshot::from_store(&store, &settings, chrono::Utc::now());
                state.write().await.update(&snapshot);
            }
        })
    }

    /// Runs the server until it fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Metrics server listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))
    }
}

async fn metrics_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    match state.read().await.registry.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// 200 once gain data exists, 503 while the camera is uncalibrated.
async fn health_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    if state.read().await.calibrated {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNCALIBRATED")
    }
}
