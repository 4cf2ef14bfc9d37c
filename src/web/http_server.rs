//! HTTP server for the landing page, status endpoints and signaling
//!
//! Plain HTTP by default, HTTPS/WSS through axum-server and rustls when a
//! certificate and key are configured.

use crate::web::shared::SharedState;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use log::{info, warn};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

const FRAMEWORK_PLACEHOLDER: &str = "{{ framework }}";

/// Build the application router
pub fn build_router(state: Arc<SharedState>) -> Router {
    let static_dir = state.config.web.static_dir.clone();
    Router::new()
        .route("/", get(index_handler))
        .route("/framework", get(framework_handler))
        .route("/detection", get(detection_handler))
        .route("/health", get(health_handler))
        .route("/socket", get(signaling_handler))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn run_http_server(
    state: Arc<SharedState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = &state.config.server;
    let addr: SocketAddr = tokio::net::lookup_host((server.host.as_str(), server.port))
        .await?
        .next()
        .ok_or("bind address did not resolve")?;
    let tls = state.config.tls.material();
    let app = build_router(state);

    match tls {
        Some((cert, key)) => {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls_config = RustlsConfig::from_pem_file(&cert, &key).await?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown.await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
            });

            info!("HTTPS server listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            info!("HTTP server listening on http://{}", addr);
            axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
        }
    }

    Ok(())
}

/// Landing page from the template directory
async fn index_handler(State(state): State<Arc<SharedState>>) -> Response {
    let index_path = PathBuf::from(&state.config.web.template_dir).join("index.html");
    match tokio::fs::read_to_string(&index_path).await {
        Ok(template) => {
            let page = template.replace(FRAMEWORK_PLACEHOLDER, &state.config.server.framework);
            (
                [
                    (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                    (header::CACHE_CONTROL, "no-store, max-age=0"),
                ],
                page,
            )
                .into_response()
        }
        Err(e) => {
            warn!("Landing page {:?} unavailable: {}", index_path, e);
            (StatusCode::NOT_FOUND, "index.html not found").into_response()
        }
    }
}

async fn framework_handler(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    Json(json!({ "framework": state.config.server.framework }))
}

async fn detection_handler(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    Json(json!({ "enabled": state.router.detection_enabled() }))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.uptime().as_secs_f64(),
        "sessions": state.session_count(),
        "connections": state.connection_count(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn signaling_handler(ws: WebSocketUpgrade, State(state): State<Arc<SharedState>>) -> Response {
    let router = state.router.clone();
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| async move {
        crate::transport::handle_signaling_connection(socket, router, hub).await;
    })
}
