//! Notification log and unmatched-link suggestions.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;

#[derive(Deserialize)]
pub(super) struct EventsQuery {
    org_id: Option<Uuid>,
    limit: Option<usize>,
}

/// `GET /api/events?org_id&limit`
pub(super) async fn handler_events(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let events = &state.engine.events;
    Json(serde_json::json!({
        "notifications": events.recent_notifications(limit),
        "events": events.recent_events(limit),
        "suggestions": events.suggestions(q.org_id),
    }))
}
