//! # Database — PostgreSQL Storage Layer
//!
//! The production [`Store`] backend over `sqlx::PgPool`. Schema lives in
//! `migrations/` and is applied by [`Database::migrate`].
//!
//! ## Schema
//!
//! - `tracked_pages`, `subscriptions`: read-mostly configuration
//! - `posts`: `UNIQUE (tracked_page_id, external_post_id)`, the race arbiter
//!   between poll and trigger discovery
//! - `engagement_actions`: partial unique index on `(post_id, user_id,
//!   action_type)` over live statuses
//! - `pacing_states`: one row per `(user_id, platform)`
//! - `user_settings`, `org_settings`, `voice_profiles`, `avoid_phrases`
//! - `audit_log`: append-only, JSONB metadata
//! - `poll_status`: per-page poll projection
//!
//! ## Module Structure
//!
//! - [`pages`] — tracked pages and subscriptions
//! - [`posts`] — create-if-absent post insert
//! - [`actions`] — action lifecycle, claiming with `FOR UPDATE SKIP LOCKED`
//! - [`pacing`] — per-account pacing rows
//! - [`settings`] — user/org settings, voice profiles, avoid phrases
//! - [`audit`] — audit trail, poll status, analytics samples

mod actions;
mod audit;
mod pacing;
mod pages;
mod posts;
mod settings;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::analytics::ReactionSample;
use crate::audit::{AuditFilter, NewAuditEntry};
use crate::models::{
    AccountKey, ActionStatus, ActionTransition, AuditLogEntry, AvoidPhrase, EngagementAction,
    NewAction, NewPost, OrgSettings, PacingState, PollStatus, Post, Subscription, TrackedPage,
    UserSettings, VoiceProfile,
};
use crate::store::{ActionFilter, Store};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// The URL is parsed by hand so percent-encoded credentials and pooler
    /// usernames containing dots survive intact.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url).context("invalid DATABASE_URL")?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .context("connect to PostgreSQL")?;
        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }

    /// Execute `SELECT 1` to verify connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────

#[async_trait]
impl Store for Database {
    async fn active_pages(&self, org_id: Option<Uuid>) -> Result<Vec<TrackedPage>> {
        Database::active_pages(self, org_id).await
    }

    async fn get_page(&self, id: Uuid) -> Result<Option<TrackedPage>> {
        Database::get_page(self, id).await
    }

    async fn list_subscriptions(&self, tracked_page_id: Uuid) -> Result<Vec<Subscription>> {
        Database::list_subscriptions(self, tracked_page_id).await
    }

    async fn get_subscription(
        &self,
        tracked_page_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Subscription>> {
        Database::get_subscription(self, tracked_page_id, user_id).await
    }

    async fn insert_post_if_absent(&self, post: NewPost) -> Result<Option<Post>> {
        Database::insert_post_if_absent(self, &post).await
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        Database::get_post(self, id).await
    }

    async fn create_action(&self, action: NewAction) -> Result<Option<EngagementAction>> {
        Database::create_action(self, &action).await
    }

    async fn get_action(&self, id: Uuid) -> Result<Option<EngagementAction>> {
        Database::get_action(self, id).await
    }

    async fn claim_due_actions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EngagementAction>> {
        Database::claim_due_actions(self, now, limit).await
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        attempted_at: DateTime<Utc>,
    ) -> Result<Option<EngagementAction>> {
        Database::mark_dispatched(self, id, attempted_at).await
    }

    async fn transition_action(
        &self,
        id: Uuid,
        transition: ActionTransition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        Database::transition_action(self, id, &transition, now).await
    }

    async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<EngagementAction>> {
        Database::list_actions(self, filter).await
    }

    async fn stale_actions(
        &self,
        status: ActionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EngagementAction>> {
        Database::stale_actions(self, status, cutoff).await
    }

    async fn load_pacing(&self, key: AccountKey) -> Result<Option<PacingState>> {
        Database::load_pacing(self, key).await
    }

    async fn save_pacing(&self, state: &PacingState) -> Result<()> {
        Database::save_pacing(self, state).await
    }

    async fn list_pacing(&self) -> Result<Vec<PacingState>> {
        Database::list_pacing(self).await
    }

    async fn user_settings(&self, user_id: Uuid) -> Result<UserSettings> {
        Database::user_settings(self, user_id).await
    }

    async fn save_user_settings(&self, settings: &UserSettings) -> Result<()> {
        Database::save_user_settings(self, settings).await
    }

    async fn org_settings(&self, org_id: Uuid) -> Result<OrgSettings> {
        Database::org_settings(self, org_id).await
    }

    async fn save_org_settings(&self, settings: &OrgSettings) -> Result<()> {
        Database::save_org_settings(self, settings).await
    }

    async fn voice_profile(&self, user_id: Uuid) -> Result<VoiceProfile> {
        Database::voice_profile(self, user_id).await
    }

    async fn avoid_phrases(&self, org_id: Uuid) -> Result<Vec<AvoidPhrase>> {
        Database::avoid_phrases(self, org_id).await
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditLogEntry> {
        Database::append_audit(self, &entry).await
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        Database::list_audit(self, filter).await
    }

    async fn upsert_poll_status(&self, status: &PollStatus) -> Result<()> {
        Database::upsert_poll_status(self, status).await
    }

    async fn poll_status(&self, tracked_page_id: Uuid) -> Result<Option<PollStatus>> {
        Database::poll_status(self, tracked_page_id).await
    }

    async fn reaction_samples(
        &self,
        org_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReactionSample>> {
        Database::reaction_samples(self, org_id, from, to).await
    }
}
