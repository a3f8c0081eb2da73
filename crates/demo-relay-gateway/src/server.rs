//! Axum-based WebSocket and REST server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use demo_relay_core::protocol::ClientRole;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

const DEFAULT_LOG_LIMIT: usize = 100;
const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Build the full router: `/ws`, `/health`, and the `/api` routes.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins());

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/interaction-log", get(interaction_log_handler))
        .route("/api/interaction-log/cleanup", post(cleanup_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(SetResponseHeaderLayer::overriding(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_XSS_PROTECTION,
                HeaderValue::from_static("1; mode=block"),
            ))
            .layer(cors),
    )
    .with_state(state)
}

/// Start the gateway server on `bind:port` and run until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(allowed)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    role: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let role = ClientRole::from_query(query.role.as_deref());
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket, role, Some(peer_addr)))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let connections = state.hub.len().await;
    let controller_connected = state.relay.controller().await.is_some();

    Json(json!({
        "status": "healthy",
        "version": version,
        "connections": connections,
        "controller_connected": controller_connected,
    }))
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.relay.snapshot().await)
}

async fn reset_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let demo = state.relay.reset().await;
    Json(json!({ "success": true, "state": demo }))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

async fn interaction_log_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<LogQuery>,
) -> impl IntoResponse {
    let log = state
        .relay
        .recent_events(query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await;
    Json(json!({
        "success": true,
        "count": log.len(),
        "log": log,
    }))
}

#[derive(Debug, Deserialize)]
struct CleanupQuery {
    days: Option<u32>,
}

async fn cleanup_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<CleanupQuery>,
) -> impl IntoResponse {
    let days = query.days.unwrap_or(DEFAULT_RETENTION_DAYS);
    if state.relay.purge_events(days).await {
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("Successfully cleared logs older than {days} days"),
            })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": "Failed to clear logs. Check server logs for details.",
            })),
        )
    }
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for Ctrl-C, shutdown signal disabled");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

