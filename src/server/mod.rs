// src/server/mod.rs

//! HTTP surface of the admission process.
//!
//! `GET /` liveness, `GET /upload/status` polling and `POST /upload`
//! (multipart, field `files`).

pub mod error;
pub mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admission::{AdmissionGate, StatusEndpoint};
use crate::config::{ConfigFile, ServerSection};
use crate::marker::FsMarkerStore;
use crate::storage::LocalStorage;
use crate::trigger::FileTriggerSlot;

pub use error::AppError;

#[derive(Debug, Clone)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub status: StatusEndpoint,
}

impl AppState {
    pub fn new(gate: Arc<AdmissionGate>, status: StatusEndpoint) -> Self {
        Self { gate, status }
    }

    /// Production wiring: marker store, trigger slot and storage from `cfg`.
    pub fn from_config(cfg: &ConfigFile) -> crate::errors::Result<Self> {
        let markers = Arc::new(FsMarkerStore::on_disk(&cfg.paths.marker_dir));
        let gate = AdmissionGate::new(
            markers.clone(),
            Arc::new(FileTriggerSlot::on_disk(&cfg.paths.trigger_dir)),
            Arc::new(LocalStorage::from_config(cfg)?),
            cfg.admission.clone(),
        );
        Ok(Self::new(Arc::new(gate), StatusEndpoint::new(markers)))
    }
}

fn cors_layer(server: &ServerSection) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.cors_origins.is_empty() || server.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the router. Used by [`serve`] and by integration tests.
pub fn build_router(state: AppState, server: &ServerSection) -> Router {
    let body_limit = server.max_upload_mib.saturating_mul(1024 * 1024);

    Router::new()
        .route("/", get(routes::root))
        .route("/upload/status", get(routes::upload_status))
        .route("/upload", post(routes::upload))
        .route("/upload/", post(routes::upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `host:port` from the config and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    server: &ServerSection,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    serve_on(state, server, listener, shutdown).await
}

/// Like [`serve`], on an already bound listener (port 0 in tests).
pub async fn serve_on(
    state: AppState,
    server: &ServerSection,
    listener: tokio::net::TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let local = listener.local_addr()?;
    let app = build_router(state, server);
    info!("admission server listening on http://{local}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
