//! API integration tests for the Axum HTTP surface.
//!
//! These tests send synthetic requests straight into the router with
//! `tower::ServiceExt::oneshot`, so no TCP listener is started. The router is
//! backed by an engine over the in-memory store, so no database is needed.
//!
//! The helpers `get()`, `post_json()` and `put_json()` return
//! `(StatusCode, serde_json::Value)` tuples for concise assertions.

mod common;

use std::sync::Arc;

use autoengage::dashboard::{build_router, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

const COMMENT: &str = "Congrats on the launch, which feature came first?";

fn app(h: &common::Harness) -> Router {
    build_router(AppState::new(Arc::clone(&h.engine)))
}

/// Harness with one LinkedIn page (`acme`) and one subscriber.
async fn seeded() -> (common::Harness, autoengage::models::TrackedPage, Uuid) {
    let h = common::memory_engine(&[COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    let user = common::add_subscriber(&h.store, &page).await;
    (h, page, user)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn with_body(
    app: Router,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(
        app,
        Request::builder()
            .uri(uri)
            .method(method)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    with_body(app, "POST", uri, body).await
}

async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    with_body(app, "PUT", uri, body).await
}

async fn get_text(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

// == Health and metrics ========================================================

#[tokio::test]
async fn healthz_returns_ok() {
    let h = common::memory_engine(&[COMMENT]);
    let (status, _, body) = get_text(app(&h), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn metrics_exposes_engine_families() {
    let (h, _, _) = seeded().await;
    post_json(
        app(&h),
        "/api/triggers/link",
        json!({ "url": "https://www.linkedin.com/posts/acme_metrics-1" }),
    )
    .await;
    let (status, headers, body) = get_text(app(&h), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/openmetrics-text"));
    assert!(body.contains("autoengage_posts_discovered"));
    assert!(body.contains("autoengage_actions_created"));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let h = common::memory_engine(&[COMMENT]);
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}

// == Trigger webhook ===========================================================

#[tokio::test]
async fn trigger_matches_then_reports_duplicate() {
    let (h, page, _) = seeded().await;
    let body = json!({
        "url": "https://www.linkedin.com/posts/acme_launch-1?utm_source=share",
        "source_label": "slack",
    });

    let (status, json) = post_json(app(&h), "/api/triggers/link", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "matched");
    assert_eq!(json["tracked_page_id"], page.id.to_string());
    assert_eq!(json["actions_created"], 2);
    assert!(json["post_id"].is_string());

    let (status, json) = post_json(app(&h), "/api/triggers/link", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "duplicate");
}

#[tokio::test]
async fn trigger_ignores_unsupported_links() {
    let (h, _, _) = seeded().await;
    let (status, json) = post_json(
        app(&h),
        "/api/triggers/link",
        json!({ "url": "https://example.com/blog/post" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ignored");
    assert!(h.store.posts().is_empty());
}

#[tokio::test]
async fn unmatched_trigger_becomes_suggestion() {
    let (h, page, _) = seeded().await;
    let (_, json) = post_json(
        app(&h),
        "/api/triggers/link",
        json!({
            "url": "https://www.linkedin.com/posts/globex_news-9",
            "org_id": page.org_id,
            "source_label": "slack",
        }),
    )
    .await;
    assert_eq!(json["status"], "unmatched");

    let (status, json) = get(app(&h), &format!("/api/events?org_id={}", page.org_id)).await;
    assert_eq!(status, StatusCode::OK);
    let suggestions = json["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["source_label"], "slack");
}

#[tokio::test]
async fn trigger_rejects_oversized_url() {
    let h = common::memory_engine(&[COMMENT]);
    let url = format!("https://www.linkedin.com/posts/acme_{}", "x".repeat(5000));
    let (status, json) = post_json(app(&h), "/api/triggers/link", json!({ "url": url })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn trigger_rejects_malformed_body() {
    let h = common::memory_engine(&[COMMENT]);
    let (status, _) = post_json(app(&h), "/api/triggers/link", json!({ "link": 1 })).await;
    assert!(status.is_client_error());
}

// == Read models ===============================================================

#[tokio::test]
async fn poll_status_404_until_polled() {
    let (h, page, _) = seeded().await;
    let uri = format!("/api/pages/{}/poll-status", page.id);
    let (status, _) = get(app(&h), &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    h.source.set(vec![common::linkedin_post("acme", "p-1")]);
    h.engine.poll_once().await.unwrap();

    let (status, json) = get(app(&h), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["posts_found"], 1);
    assert_eq!(json["new_posts"], 1);
}

#[tokio::test]
async fn actions_filter_by_type_and_status() {
    let (h, page, user) = seeded().await;
    post_json(
        app(&h),
        "/api/triggers/link",
        json!({ "url": "https://www.linkedin.com/posts/acme_launch-2" }),
    )
    .await;

    let (status, json) = get(
        app(&h),
        &format!("/api/actions?org_id={}&user_id={}", page.org_id, user),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);

    let (_, json) = get(app(&h), "/api/actions?action_type=comment&status=pending").await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["actions"][0]["action_type"], "comment");

    let (_, json) = get(app(&h), "/api/actions?status=completed").await;
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn audit_list_and_csv_export() {
    let (h, page, _) = seeded().await;
    post_json(
        app(&h),
        "/api/triggers/link",
        json!({ "url": "https://www.linkedin.com/posts/acme_launch-3" }),
    )
    .await;
    h.engine
        .dispatcher
        .dispatch_due_inline(Utc::now())
        .await
        .unwrap();

    let (status, json) = get(app(&h), &format!("/api/audit?org_id={}", page.org_id)).await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = json["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"post_fanout"));
    assert!(actions.contains(&"like_completed"));

    let (_, json) = get(
        app(&h),
        &format!("/api/audit?org_id={}&action=like_completed", page.org_id),
    )
    .await;
    assert_eq!(json["count"], 1);

    let (status, headers, body) =
        get_text(app(&h), &format!("/api/audit/export?org_id={}", page.org_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/csv"));
    assert!(headers["content-disposition"]
        .to_str()
        .unwrap()
        .contains("audit_log.csv"));
    let mut lines = body.lines();
    assert_eq!(
        lines.next().unwrap(),
        "id,user_id,action,target_type,target_id,created_at,metadata"
    );
    assert!(body.contains("like_completed"));
}

#[tokio::test]
async fn analytics_summary_counts_completed_like() {
    let (h, page, _) = seeded().await;
    post_json(
        app(&h),
        "/api/triggers/link",
        json!({ "url": "https://www.linkedin.com/posts/acme_launch-4" }),
    )
    .await;
    h.engine
        .dispatcher
        .dispatch_due_inline(Utc::now())
        .await
        .unwrap();

    let (status, json) = get(
        app(&h),
        &format!("/api/analytics/summary?org_id={}", page.org_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["summary"]["likes"]["completed"], 1);
    assert_eq!(json["summary"]["comments"]["pending"], 1);
    assert_eq!(json["summary"]["like_reaction_time"]["count"], 1);
    assert_eq!(json["recent_activity"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn analytics_summary_requires_org() {
    let h = common::memory_engine(&[COMMENT]);
    let (status, _) = get(app(&h), "/api/analytics/summary").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// == Settings ==================================================================

#[tokio::test]
async fn user_settings_default_then_partial_update() {
    let h = common::memory_engine(&[COMMENT]);
    let user = Uuid::new_v4();
    let uri = format!("/api/settings/users/{}", user);

    let (status, json) = get(app(&h), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["risk_profile"], "safe");
    assert_eq!(json["quiet_hours_enabled"], true);
    assert_eq!(json["polling_interval"], 300);

    let (status, json) = put_json(
        app(&h),
        &uri,
        json!({
            "risk_profile": "aggro",
            "quiet_hours_start": "23:30",
            "polling_interval": 10,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["risk_profile"], "aggro");
    assert_eq!(json["quiet_hours_start"], "23:30:00");
    assert_eq!(json["quiet_hours_end"], "07:00:00");
    assert_eq!(json["polling_interval"], 60);

    let (_, json) = get(app(&h), &uri).await;
    assert_eq!(json["risk_profile"], "aggro");
}

#[tokio::test]
async fn user_settings_rejects_bad_time() {
    let h = common::memory_engine(&[COMMENT]);
    let uri = format!("/api/settings/users/{}", Uuid::new_v4());
    let (status, json) = put_json(app(&h), &uri, json!({ "quiet_hours_end": "7pm" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("quiet_hours_end"));
}

#[tokio::test]
async fn org_settings_validate_comment_window() {
    let h = common::memory_engine(&[COMMENT]);
    let uri = format!("/api/settings/orgs/{}", Uuid::new_v4());

    let (status, _) = put_json(
        app(&h),
        &uri,
        json!({ "comment_window_min_secs": 600, "comment_window_max_secs": 60 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = put_json(
        app(&h),
        &uri,
        json!({
            "quiet_hours_enabled": false,
            "comment_window_min_secs": 60,
            "comment_window_max_secs": 300,
            "polling_interval": 99999,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["polling_interval"], 3600);

    // Absent fields keep their stored values.
    let (_, json) = put_json(app(&h), &uri, json!({ "comment_window_max_secs": 900 })).await;
    assert_eq!(json["quiet_hours_enabled"], false);
    assert_eq!(json["comment_window_min_secs"], 60);
    assert_eq!(json["comment_window_max_secs"], 900);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let h = common::memory_engine(&[COMMENT]);
    let (status, _) = get(app(&h), "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
