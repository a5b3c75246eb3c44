//! Realtime link trigger webhook.
//!
//! `POST /api/triggers/link` with `{url, observed_at?, source_label?, org_id?}`.
//! The response is the trigger outcome, tagged by `status`:
//! `matched`, `duplicate`, `unmatched` or `ignored`. All four are 200s; only
//! storage failures produce a 500.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::{bad_request, internal_error, AppState};
use crate::discovery::LinkTrigger;

pub(super) async fn handler_link_trigger(
    State(state): State<Arc<AppState>>,
    Json(trigger): Json<LinkTrigger>,
) -> Response {
    if trigger.url.len() > 4096 {
        return bad_request("url too long");
    }
    match state.engine.trigger(&trigger).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => internal_error(e),
    }
}
