//! Action and poll-status read models.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use super::{internal_error, AppState};
use crate::store::ActionFilter;

/// `GET /api/pages/{id}/poll-status`. 404 until the page has been polled once.
pub(super) async fn handler_poll_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.engine.store.poll_status(id).await {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "page has not been polled" })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// `GET /api/actions?org_id&user_id&tracked_page_id&status&action_type&from&to&limit`
pub(super) async fn handler_actions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ActionFilter>,
) -> Response {
    match state.engine.store.list_actions(&filter).await {
        Ok(actions) => Json(serde_json::json!({
            "count": actions.len(),
            "actions": actions,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}
