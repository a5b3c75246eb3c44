//! Per-user and per-org automation settings.
//!
//! Reads return defaults for ids that never saved settings. User writes are
//! clamped (`polling_interval` to 60-3600 s) by the store; the stored value is
//! echoed back.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveTime;
use serde::Deserialize;
use uuid::Uuid;

use super::{bad_request, internal_error, AppState};
use crate::config::parse_hhmm;
use crate::models::{
    OrgSettings, RiskProfile, UserSettings, MAX_POLLING_INTERVAL_SECS, MIN_POLLING_INTERVAL_SECS,
};

/// Partial update; absent fields keep their stored value.
#[derive(Deserialize)]
pub(super) struct UserSettingsUpdate {
    risk_profile: Option<RiskProfile>,
    quiet_hours_enabled: Option<bool>,
    /// `HH:MM`
    quiet_hours_start: Option<String>,
    quiet_hours_end: Option<String>,
    polling_interval: Option<i32>,
    utc_offset_minutes: Option<i32>,
}

#[derive(Deserialize)]
pub(super) struct OrgSettingsUpdate {
    quiet_hours_enabled: Option<bool>,
    comment_window_min_secs: Option<i32>,
    comment_window_max_secs: Option<i32>,
    polling_interval: Option<i32>,
}

fn parse_time(field: &str, value: Option<String>) -> Result<Option<NaiveTime>, Response> {
    value
        .map(|v| parse_hhmm(&v).map_err(|e| bad_request(format!("{}: {}", field, e))))
        .transpose()
}

pub(super) async fn handler_get_user_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.engine.store.user_settings(id).await {
        Ok(s) => Json(s).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn handler_put_user_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<UserSettingsUpdate>,
) -> Response {
    let store = &state.engine.store;
    let current = match store.user_settings(id).await {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };
    let start = match parse_time("quiet_hours_start", update.quiet_hours_start) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let end = match parse_time("quiet_hours_end", update.quiet_hours_end) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let next = UserSettings {
        user_id: id,
        risk_profile: update.risk_profile.unwrap_or(current.risk_profile),
        quiet_hours_enabled: update
            .quiet_hours_enabled
            .unwrap_or(current.quiet_hours_enabled),
        quiet_hours_start: start.unwrap_or(current.quiet_hours_start),
        quiet_hours_end: end.unwrap_or(current.quiet_hours_end),
        polling_interval: update.polling_interval.unwrap_or(current.polling_interval),
        utc_offset_minutes: update
            .utc_offset_minutes
            .unwrap_or(current.utc_offset_minutes),
    };
    if let Err(e) = store.save_user_settings(&next).await {
        return internal_error(e);
    }
    match store.user_settings(id).await {
        Ok(s) => Json(s).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn handler_get_org_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.engine.store.org_settings(id).await {
        Ok(s) => Json(s).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn handler_put_org_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<OrgSettingsUpdate>,
) -> Response {
    let store = &state.engine.store;
    let current = match store.org_settings(id).await {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };
    let next = OrgSettings {
        org_id: id,
        quiet_hours_enabled: update
            .quiet_hours_enabled
            .unwrap_or(current.quiet_hours_enabled),
        comment_window_min_secs: update
            .comment_window_min_secs
            .or(current.comment_window_min_secs),
        comment_window_max_secs: update
            .comment_window_max_secs
            .or(current.comment_window_max_secs),
        polling_interval: update
            .polling_interval
            .map(|v| v.clamp(MIN_POLLING_INTERVAL_SECS, MAX_POLLING_INTERVAL_SECS))
            .or(current.polling_interval),
    };
    if let (Some(min), Some(max)) = (next.comment_window_min_secs, next.comment_window_max_secs) {
        if min < 0 || max < min {
            return bad_request("comment window must satisfy 0 <= min <= max");
        }
    }
    if let Err(e) = store.save_org_settings(&next).await {
        return internal_error(e);
    }
    Json(next).into_response()
}
