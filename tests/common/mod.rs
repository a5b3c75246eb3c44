//! Shared test helpers for integration tests.
//!
//! Engine fixtures run against [`MemoryStore`] with scripted collaborators;
//! database helpers need `TEST_DATABASE_URL`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use autoengage::collaborators::{
    ActionSink, PolledPost, PostSource, SinkRequest, SinkResult,
};
use autoengage::comments::{CommentDrafter, DraftRequest};
use autoengage::config::EngineConfig;
use autoengage::engine::Collaborators;
use autoengage::models::{PageType, Platform, PollingMode, Subscription, TrackedPage, UserSettings};
use autoengage::{Engine, MemoryStore, Store};
use chrono::Utc;
use uuid::Uuid;

// ── Database ────────────────────────────────────────────────────

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Connect, apply migrations and empty every engine table.
pub async fn setup_test_db() -> autoengage::db::Database {
    let db = autoengage::db::Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("Failed to apply migrations");
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate engine tables. Global avoid phrases are reference data and stay.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE audit_log, poll_status, engagement_actions, posts, subscriptions,
                       tracked_pages, pacing_states, user_settings, org_settings,
                       voice_profiles
         CASCADE;
         DELETE FROM avoid_phrases WHERE org_id IS NOT NULL;",
    )
    .execute(pool)
    .await
    .unwrap();
}

// ── Fixtures ────────────────────────────────────────────────────

pub fn linkedin_page(org_id: Uuid, handle: &str) -> TrackedPage {
    TrackedPage {
        id: Uuid::new_v4(),
        org_id,
        platform: Platform::Linkedin,
        external_id: Some(handle.to_string()),
        url: format!("https://www.linkedin.com/company/{}", handle),
        name: handle.to_string(),
        page_type: PageType::CompanyPage,
        active: true,
        created_at: Utc::now(),
    }
}

pub fn subscription(page: &TrackedPage, user_id: Uuid, mode: PollingMode) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        tracked_page_id: page.id,
        user_id,
        auto_like: true,
        auto_comment: true,
        polling_mode: mode,
        tags: vec!["saas".into()],
        created_at: Utc::now(),
    }
}

/// Subscribe a fresh user to `page` with quiet hours off, so wall-clock tests
/// never land in a deferral window.
pub async fn add_subscriber(store: &MemoryStore, page: &TrackedPage) -> Uuid {
    let user = Uuid::new_v4();
    store.insert_subscription(subscription(page, user, PollingMode::Normal));
    store
        .save_user_settings(&UserSettings {
            quiet_hours_enabled: false,
            ..UserSettings::defaults(user)
        })
        .await
        .unwrap();
    user
}

pub fn linkedin_post(handle: &str, slug: &str) -> PolledPost {
    PolledPost {
        external_post_id: slug.to_string(),
        url: format!("https://www.linkedin.com/posts/{}_{}", handle, slug),
        content_text: Some("We just shipped our new onboarding flow.".into()),
    }
}

// ── Scripted collaborators ──────────────────────────────────────

/// Returns whatever posts the test put in it.
#[derive(Default)]
pub struct ScriptedSource {
    pub posts: Mutex<Vec<PolledPost>>,
}

impl ScriptedSource {
    pub fn set(&self, posts: Vec<PolledPost>) {
        *self.posts.lock().unwrap() = posts;
    }
}

#[async_trait]
impl PostSource for ScriptedSource {
    async fn fetch_recent(&self, _page: &TrackedPage) -> Result<Vec<PolledPost>> {
        Ok(self.posts.lock().unwrap().clone())
    }
}

/// Records every request and answers with a fixed result.
pub struct RecordingSink {
    pub requests: Mutex<Vec<SinkRequest>>,
    pub result: Mutex<SinkResult>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        RecordingSink {
            requests: Mutex::new(Vec::new()),
            result: Mutex::new(SinkResult::completed()),
        }
    }
}

impl RecordingSink {
    pub fn respond_with(&self, result: SinkResult) {
        *self.result.lock().unwrap() = result;
    }

    pub fn requests(&self) -> Vec<SinkRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn execute(&self, request: &SinkRequest) -> Result<SinkResult> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.result.lock().unwrap().clone())
    }
}

/// Always drafts the same candidates.
pub struct FixedDrafter(pub Vec<String>);

#[async_trait]
impl CommentDrafter for FixedDrafter {
    async fn draft(&self, _request: &DraftRequest) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<ScriptedSource>,
    pub sink: Arc<RecordingSink>,
    pub engine: Arc<Engine>,
}

/// Engine over a memory store, with default configuration.
pub fn memory_engine(candidates: &[&str]) -> Harness {
    memory_engine_with(candidates, EngineConfig::default())
}

pub fn memory_engine_with(candidates: &[&str], config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink::default());
    let engine = Arc::new(Engine::new(
        store.clone(),
        Collaborators {
            source: source.clone(),
            sink: sink.clone(),
            sessions: store.clone(),
            drafter: Arc::new(FixedDrafter(
                candidates.iter().map(|c| c.to_string()).collect(),
            )),
            expander: None,
        },
        config,
    ));
    Harness {
        store,
        source,
        sink,
        engine,
    }
}
