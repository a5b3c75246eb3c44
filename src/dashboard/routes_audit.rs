//! # Audit & Analytics Endpoints
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /api/audit` | Audit rows, newest first, filtered by org/user/action/date |
//! | `GET /api/audit/export` | Same filter, rendered as CSV |
//! | `GET /api/analytics/summary` | Counts and reaction-time statistics for one org |

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{internal_error, AppState};
use crate::analytics::AnalyticsSummary;
use crate::audit::{export_csv, AuditFilter};
use crate::models::ActionStatus;
use crate::store::ActionFilter;

const RECENT_ACTIVITY: i64 = 20;

pub(super) async fn handler_audit(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AuditFilter>,
) -> Response {
    match state.engine.store.list_audit(&filter).await {
        Ok(entries) => Json(serde_json::json!({
            "count": entries.len(),
            "entries": entries,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn handler_audit_export(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AuditFilter>,
) -> Response {
    let filter = AuditFilter {
        limit: Some(filter.limit.unwrap_or(10_000)),
        ..filter
    };
    let csv = match state.engine.store.list_audit(&filter).await {
        Ok(entries) => export_csv(&entries),
        Err(e) => return internal_error(e),
    };
    match csv {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"audit_log.csv\"",
                ),
            ],
            body,
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
pub(super) struct SummaryQuery {
    org_id: Uuid,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

/// `GET /api/analytics/summary?org_id&from&to`. The range applies to post
/// `first_seen_at`.
pub(super) async fn handler_analytics_summary(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SummaryQuery>,
) -> Response {
    let store = &state.engine.store;
    let samples = match store.reaction_samples(q.org_id, q.from, q.to).await {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };
    let recent = match store
        .list_actions(&ActionFilter {
            org_id: Some(q.org_id),
            status: Some(ActionStatus::Completed),
            limit: Some(RECENT_ACTIVITY),
            ..Default::default()
        })
        .await
    {
        Ok(a) => a,
        Err(e) => return internal_error(e),
    };
    Json(serde_json::json!({
        "summary": AnalyticsSummary::from_samples(&samples),
        "recent_activity": recent,
    }))
    .into_response()
}
