//! # Dashboard — HTTP Read Models and Trigger Webhook
//!
//! Axum server in front of a running [`Engine`]. The presentation layer reads
//! poll status, actions, audit rows, analytics and settings from here; the
//! message-monitoring collaborator posts realtime link triggers to
//! `/api/triggers/link`.
//!
//! | Endpoint | Module |
//! |----------|--------|
//! | `GET /healthz`, `GET /metrics` | [`routes_health`] |
//! | `POST /api/triggers/link` | [`routes_triggers`] |
//! | `GET /api/pages/{id}/poll-status`, `GET /api/actions` | [`routes_actions`] |
//! | `GET /api/audit`, `GET /api/audit/export`, `GET /api/analytics/summary` | [`routes_audit`] |
//! | `GET/PUT /api/settings/users/{id}`, `GET/PUT /api/settings/orgs/{id}` | [`routes_settings`] |
//! | `GET /api/events` | [`routes_events`] |

mod routes_actions;
mod routes_audit;
mod routes_events;
mod routes_health;
mod routes_settings;
mod routes_triggers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

use crate::engine::Engine;
use crate::prom_metrics::HttpLabel;

pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Arc<Self> {
        Arc::new(AppState { engine })
    }
}

/// 500 with a JSON `{"error": ...}` body.
pub(super) fn internal_error(e: anyhow::Error) -> Response {
    warn!(error = %format!("{:#}", e), "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("{:#}", e) })),
    )
        .into_response()
}

pub(super) fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Records request duration and tags each request with an id.
async fn metrics_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .engine
        .metrics
        .http_request_duration
        .get_or_create(&HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse UUID and numeric path segments so metric labels stay bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/metrics", get(routes_health::handler_metrics))
        .route(
            "/api/triggers/link",
            post(routes_triggers::handler_link_trigger),
        )
        .route(
            "/api/pages/{id}/poll-status",
            get(routes_actions::handler_poll_status),
        )
        .route("/api/actions", get(routes_actions::handler_actions))
        .route("/api/audit", get(routes_audit::handler_audit))
        .route("/api/audit/export", get(routes_audit::handler_audit_export))
        .route(
            "/api/analytics/summary",
            get(routes_audit::handler_analytics_summary),
        )
        .route(
            "/api/settings/users/{id}",
            get(routes_settings::handler_get_user_settings)
                .put(routes_settings::handler_put_user_settings),
        )
        .route(
            "/api/settings/orgs/{id}",
            get(routes_settings::handler_get_org_settings)
                .put(routes_settings::handler_put_org_settings),
        )
        .route("/api/events", get(routes_events::handler_events))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(256 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

/// Serve the HTTP surface until SIGINT/SIGTERM.
pub async fn run(engine: Arc<Engine>, port: u16) -> Result<()> {
    let app = build_router(AppState::new(engine));
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "HTTP server running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
