//! # Store — Persistence Contract
//!
//! Everything the engine reads or writes goes through [`Store`]. Two
//! implementations exist:
//!
//! - [`crate::db::Database`]: PostgreSQL via `sqlx`, the production backend.
//! - [`MemoryStore`]: mutex-guarded tables for tests and single-process demos.
//!
//! ## Idempotency rules both backends enforce
//!
//! - `insert_post_if_absent` creates at most one row per
//!   `(tracked_page_id, external_post_id)` and returns `None` to every caller
//!   but the first.
//! - `create_action` returns `None` when a non-terminal action already exists
//!   for the same `(post_id, user_id, action_type)`.
//! - `claim_due_actions` moves each due `pending` row to `scheduled` exactly
//!   once, oldest `scheduled_at` first.

mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::analytics::ReactionSample;
use crate::audit::{AuditFilter, NewAuditEntry};
use crate::models::{
    AccountKey, ActionStatus, ActionTransition, ActionType, AuditLogEntry, AvoidPhrase,
    EngagementAction, NewAction, NewPost, OrgSettings, PacingState, PollStatus, Post,
    Subscription, TrackedPage, UserSettings, VoiceProfile,
};

/// Filter for action queries. Results are newest `scheduled_at` first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionFilter {
    pub org_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub tracked_page_id: Option<Uuid>,
    pub status: Option<ActionStatus>,
    pub action_type: Option<ActionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl ActionFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 10_000)
    }

    pub fn matches(&self, a: &EngagementAction) -> bool {
        self.org_id.is_none_or(|v| a.org_id == v)
            && self.user_id.is_none_or(|v| a.user_id == v)
            && self.tracked_page_id.is_none_or(|v| a.tracked_page_id == v)
            && self.status.is_none_or(|v| a.status == v)
            && self.action_type.is_none_or(|v| a.action_type == v)
            && self.from.is_none_or(|v| a.scheduled_at >= v)
            && self.to.is_none_or(|v| a.scheduled_at <= v)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── Pages & subscriptions ───────────────────────────────────

    /// Active pages, optionally restricted to one organization.
    async fn active_pages(&self, org_id: Option<Uuid>) -> Result<Vec<TrackedPage>>;

    async fn get_page(&self, id: Uuid) -> Result<Option<TrackedPage>>;

    /// Subscriptions for a page in creation order.
    async fn list_subscriptions(&self, tracked_page_id: Uuid) -> Result<Vec<Subscription>>;

    async fn get_subscription(
        &self,
        tracked_page_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Subscription>>;

    // ── Posts ───────────────────────────────────────────────────

    /// Create-if-absent. `None` means another writer created the post first.
    async fn insert_post_if_absent(&self, post: NewPost) -> Result<Option<Post>>;

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>>;

    // ── Actions ─────────────────────────────────────────────────

    /// `None` when a non-terminal action already exists for the same key.
    async fn create_action(&self, action: NewAction) -> Result<Option<EngagementAction>>;

    async fn get_action(&self, id: Uuid) -> Result<Option<EngagementAction>>;

    /// Atomically move due `pending` actions to `scheduled`.
    async fn claim_due_actions(&self, now: DateTime<Utc>, limit: i64)
        -> Result<Vec<EngagementAction>>;

    /// `scheduled → dispatched`, stamping `attempted_at` and bumping `attempts`.
    /// `None` when the action is no longer `scheduled`.
    async fn mark_dispatched(
        &self,
        id: Uuid,
        attempted_at: DateTime<Utc>,
    ) -> Result<Option<EngagementAction>>;

    async fn transition_action(
        &self,
        id: Uuid,
        transition: ActionTransition,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<EngagementAction>>;

    /// Actions stuck in `status` since before `cutoff` (`updated_at` for
    /// `scheduled`, `attempted_at` for `dispatched`).
    async fn stale_actions(
        &self,
        status: ActionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EngagementAction>>;

    // ── Pacing ──────────────────────────────────────────────────

    async fn load_pacing(&self, key: AccountKey) -> Result<Option<PacingState>>;

    async fn save_pacing(&self, state: &PacingState) -> Result<()>;

    async fn list_pacing(&self) -> Result<Vec<PacingState>>;

    // ── Settings & compliance inputs ────────────────────────────

    /// Stored settings, or defaults for a user who never saved any.
    async fn user_settings(&self, user_id: Uuid) -> Result<UserSettings>;

    async fn save_user_settings(&self, settings: &UserSettings) -> Result<()>;

    async fn org_settings(&self, org_id: Uuid) -> Result<OrgSettings>;

    async fn save_org_settings(&self, settings: &OrgSettings) -> Result<()>;

    async fn voice_profile(&self, user_id: Uuid) -> Result<VoiceProfile>;

    /// Active global defaults plus the organization's own phrases.
    async fn avoid_phrases(&self, org_id: Uuid) -> Result<Vec<AvoidPhrase>>;

    // ── Audit, status, analytics ────────────────────────────────

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditLogEntry>;

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>>;

    async fn upsert_poll_status(&self, status: &PollStatus) -> Result<()>;

    async fn poll_status(&self, tracked_page_id: Uuid) -> Result<Option<PollStatus>>;

    /// One sample per action in the org whose post was first seen in range.
    async fn reaction_samples(
        &self,
        org_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReactionSample>>;
}
