//! In-memory [`Store`] backend.
//!
//! A single mutex guards all tables, so every trait method is one critical
//! section and the uniqueness rules hold under concurrent callers exactly as
//! the database constraints do. Seeding helpers (`insert_page`,
//! `insert_subscription`, ...) stand in for the CRUD surface that lives
//! outside the engine.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ActionFilter, Store};
use crate::analytics::ReactionSample;
use crate::audit::{AuditFilter, NewAuditEntry};
use crate::collaborators::SessionStatus;
use crate::comments::DEFAULT_AVOID_PHRASES;
use crate::models::{
    AccountKey, ActionStatus, ActionTransition, AuditLogEntry, AvoidPhrase, EngagementAction,
    NewAction, NewPost, OrgSettings, PacingState, Platform, PollStatus, Post, Subscription,
    TrackedPage, UserSettings, VoiceProfile,
};

#[derive(Default)]
struct Tables {
    pages: HashMap<Uuid, TrackedPage>,
    subscriptions: Vec<Subscription>,
    posts: Vec<Post>,
    actions: Vec<EngagementAction>,
    pacing: HashMap<AccountKey, PacingState>,
    user_settings: HashMap<Uuid, UserSettings>,
    org_settings: HashMap<Uuid, OrgSettings>,
    voice_profiles: HashMap<Uuid, VoiceProfile>,
    avoid_phrases: Vec<AvoidPhrase>,
    audit: Vec<AuditLogEntry>,
    poll_status: HashMap<Uuid, PollStatus>,
    signed_out: HashSet<AccountKey>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store seeded with the global avoid-phrase defaults.
    pub fn new() -> Self {
        let tables = Tables {
            avoid_phrases: DEFAULT_AVOID_PHRASES
                .iter()
                .map(|p| AvoidPhrase {
                    id: Uuid::new_v4(),
                    org_id: None,
                    phrase: p.to_string(),
                    active: true,
                })
                .collect(),
            ..Default::default()
        };
        MemoryStore {
            tables: Mutex::new(tables),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding helpers ─────────────────────────────────────────

    pub fn insert_page(&self, page: TrackedPage) {
        self.lock().pages.insert(page.id, page);
    }

    pub fn set_page_active(&self, page_id: Uuid, active: bool) {
        if let Some(p) = self.lock().pages.get_mut(&page_id) {
            p.active = active;
        }
    }

    /// Insert or replace the subscription for `(tracked_page_id, user_id)`.
    pub fn insert_subscription(&self, sub: Subscription) {
        let mut t = self.lock();
        t.subscriptions
            .retain(|s| !(s.tracked_page_id == sub.tracked_page_id && s.user_id == sub.user_id));
        t.subscriptions.push(sub);
    }

    pub fn set_subscription_flags(
        &self,
        tracked_page_id: Uuid,
        user_id: Uuid,
        auto_like: bool,
        auto_comment: bool,
    ) {
        let mut t = self.lock();
        if let Some(s) = t
            .subscriptions
            .iter_mut()
            .find(|s| s.tracked_page_id == tracked_page_id && s.user_id == user_id)
        {
            s.auto_like = auto_like;
            s.auto_comment = auto_comment;
        }
    }

    pub fn set_voice_profile(&self, profile: VoiceProfile) {
        self.lock().voice_profiles.insert(profile.user_id, profile);
    }

    pub fn add_avoid_phrase(&self, org_id: Option<Uuid>, phrase: &str) {
        self.lock().avoid_phrases.push(AvoidPhrase {
            id: Uuid::new_v4(),
            org_id,
            phrase: phrase.to_string(),
            active: true,
        });
    }

    /// Mark an account's session valid or invalid for [`SessionStatus`].
    pub fn set_session(&self, user_id: Uuid, platform: Platform, authenticated: bool) {
        let key = AccountKey { user_id, platform };
        let mut t = self.lock();
        if authenticated {
            t.signed_out.remove(&key);
        } else {
            t.signed_out.insert(key);
        }
    }

    pub fn posts(&self) -> Vec<Post> {
        self.lock().posts.clone()
    }

    pub fn actions(&self) -> Vec<EngagementAction> {
        self.lock().actions.clone()
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.lock().audit.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn active_pages(&self, org_id: Option<Uuid>) -> Result<Vec<TrackedPage>> {
        let t = self.lock();
        let mut pages: Vec<TrackedPage> = t
            .pages
            .values()
            .filter(|p| p.active && org_id.is_none_or(|o| p.org_id == o))
            .cloned()
            .collect();
        pages.sort_by_key(|p| (p.created_at, p.id));
        Ok(pages)
    }

    async fn get_page(&self, id: Uuid) -> Result<Option<TrackedPage>> {
        Ok(self.lock().pages.get(&id).cloned())
    }

    async fn list_subscriptions(&self, tracked_page_id: Uuid) -> Result<Vec<Subscription>> {
        let t = self.lock();
        let mut subs: Vec<Subscription> = t
            .subscriptions
            .iter()
            .filter(|s| s.tracked_page_id == tracked_page_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| (s.created_at, s.id));
        Ok(subs)
    }

    async fn get_subscription(
        &self,
        tracked_page_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .find(|s| s.tracked_page_id == tracked_page_id && s.user_id == user_id)
            .cloned())
    }

    async fn insert_post_if_absent(&self, post: NewPost) -> Result<Option<Post>> {
        let mut t = self.lock();
        if t.posts.iter().any(|p| {
            p.tracked_page_id == post.tracked_page_id && p.external_post_id == post.external_post_id
        }) {
            return Ok(None);
        }
        let row = Post {
            id: Uuid::new_v4(),
            tracked_page_id: post.tracked_page_id,
            platform: post.platform,
            external_post_id: post.external_post_id,
            url: post.url,
            content_text: post.content_text,
            discovered_via: post.discovered_via,
            first_seen_at: post.first_seen_at,
        };
        t.posts.push(row.clone());
        Ok(Some(row))
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        Ok(self.lock().posts.iter().find(|p| p.id == id).cloned())
    }

    async fn create_action(&self, action: NewAction) -> Result<Option<EngagementAction>> {
        let mut t = self.lock();
        if t.actions.iter().any(|a| {
            a.post_id == action.post_id
                && a.user_id == action.user_id
                && a.action_type == action.action_type
                && !a.status.is_terminal()
        }) {
            return Ok(None);
        }
        let now = Utc::now();
        let row = EngagementAction {
            id: Uuid::new_v4(),
            post_id: action.post_id,
            user_id: action.user_id,
            org_id: action.org_id,
            tracked_page_id: action.tracked_page_id,
            platform: action.platform,
            action_type: action.action_type,
            status: ActionStatus::Pending,
            scheduled_at: action.scheduled_at,
            attempted_at: None,
            completed_at: None,
            error_message: None,
            comment_text: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        t.actions.push(row.clone());
        Ok(Some(row))
    }

    async fn get_action(&self, id: Uuid) -> Result<Option<EngagementAction>> {
        Ok(self.lock().actions.iter().find(|a| a.id == id).cloned())
    }

    async fn claim_due_actions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EngagementAction>> {
        let mut t = self.lock();
        let mut due: Vec<usize> = t
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.status == ActionStatus::Pending && a.scheduled_at <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| (t.actions[i].scheduled_at, t.actions[i].created_at));
        due.truncate(limit.max(0) as usize);
        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let a = &mut t.actions[i];
            a.status = ActionStatus::Scheduled;
            a.updated_at = now;
            claimed.push(a.clone());
        }
        Ok(claimed)
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        attempted_at: DateTime<Utc>,
    ) -> Result<Option<EngagementAction>> {
        let mut t = self.lock();
        let Some(a) = t
            .actions
            .iter_mut()
            .find(|a| a.id == id && a.status == ActionStatus::Scheduled)
        else {
            return Ok(None);
        };
        a.status = ActionStatus::Dispatched;
        a.attempted_at = Some(attempted_at);
        a.attempts += 1;
        a.updated_at = attempted_at;
        Ok(Some(a.clone()))
    }

    async fn transition_action(
        &self,
        id: Uuid,
        transition: ActionTransition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut t = self.lock();
        let a = t
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("action {} not found", id))?;
        if a.status.is_terminal() {
            return Err(anyhow!("action {} is already {}", id, a.status));
        }
        match transition {
            ActionTransition::Requeue {
                scheduled_at,
                error_message,
                refund_attempt,
            } => {
                a.status = ActionStatus::Pending;
                a.scheduled_at = scheduled_at;
                a.error_message = error_message;
                if refund_attempt {
                    a.attempts = (a.attempts - 1).max(0);
                }
            }
            ActionTransition::Complete {
                completed_at,
                comment_text,
            } => {
                a.status = ActionStatus::Completed;
                a.completed_at = Some(completed_at);
                a.comment_text = comment_text;
                a.error_message = None;
            }
            ActionTransition::Fail { error_message } => {
                a.status = ActionStatus::Failed;
                a.error_message = Some(error_message);
            }
        }
        a.updated_at = now;
        Ok(())
    }

    async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<EngagementAction>> {
        let t = self.lock();
        let mut rows: Vec<EngagementAction> =
            t.actions.iter().filter(|a| filter.matches(a)).cloned().collect();
        rows.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        rows.truncate(filter.effective_limit() as usize);
        Ok(rows)
    }

    async fn stale_actions(
        &self,
        status: ActionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EngagementAction>> {
        let t = self.lock();
        Ok(t.actions
            .iter()
            .filter(|a| a.status == status)
            .filter(|a| match status {
                ActionStatus::Dispatched => a.attempted_at.is_some_and(|at| at < cutoff),
                _ => a.updated_at < cutoff,
            })
            .cloned()
            .collect())
    }

    async fn load_pacing(&self, key: AccountKey) -> Result<Option<PacingState>> {
        Ok(self.lock().pacing.get(&key).cloned())
    }

    async fn save_pacing(&self, state: &PacingState) -> Result<()> {
        self.lock().pacing.insert(state.key(), state.clone());
        Ok(())
    }

    async fn list_pacing(&self) -> Result<Vec<PacingState>> {
        Ok(self.lock().pacing.values().cloned().collect())
    }

    async fn user_settings(&self, user_id: Uuid) -> Result<UserSettings> {
        Ok(self
            .lock()
            .user_settings
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserSettings::defaults(user_id)))
    }

    async fn save_user_settings(&self, settings: &UserSettings) -> Result<()> {
        let settings = settings.clone().clamp();
        self.lock().user_settings.insert(settings.user_id, settings);
        Ok(())
    }

    async fn org_settings(&self, org_id: Uuid) -> Result<OrgSettings> {
        Ok(self
            .lock()
            .org_settings
            .get(&org_id)
            .cloned()
            .unwrap_or_else(|| OrgSettings::defaults(org_id)))
    }

    async fn save_org_settings(&self, settings: &OrgSettings) -> Result<()> {
        self.lock().org_settings.insert(settings.org_id, settings.clone());
        Ok(())
    }

    async fn voice_profile(&self, user_id: Uuid) -> Result<VoiceProfile> {
        Ok(self
            .lock()
            .voice_profiles
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| VoiceProfile {
                user_id,
                ..Default::default()
            }))
    }

    async fn avoid_phrases(&self, org_id: Uuid) -> Result<Vec<AvoidPhrase>> {
        Ok(self
            .lock()
            .avoid_phrases
            .iter()
            .filter(|p| p.active && p.org_id.is_none_or(|o| o == org_id))
            .cloned()
            .collect())
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditLogEntry> {
        let row = AuditLogEntry {
            id: Uuid::new_v4(),
            org_id: entry.org_id,
            user_id: entry.user_id,
            action: entry.action,
            target_type: entry.target_type,
            target_id: entry.target_id,
            metadata: entry.metadata,
            created_at: Utc::now(),
        };
        self.lock().audit.push(row.clone());
        Ok(row)
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let t = self.lock();
        let mut rows: Vec<AuditLogEntry> =
            t.audit.iter().rev().filter(|e| filter.matches(e)).cloned().collect();
        rows.truncate(filter.effective_limit() as usize);
        Ok(rows)
    }

    async fn upsert_poll_status(&self, status: &PollStatus) -> Result<()> {
        self.lock()
            .poll_status
            .insert(status.tracked_page_id, status.clone());
        Ok(())
    }

    async fn poll_status(&self, tracked_page_id: Uuid) -> Result<Option<PollStatus>> {
        Ok(self.lock().poll_status.get(&tracked_page_id).cloned())
    }

    async fn reaction_samples(
        &self,
        org_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReactionSample>> {
        let t = self.lock();
        let posts: HashMap<Uuid, &Post> = t.posts.iter().map(|p| (p.id, p)).collect();
        Ok(t.actions
            .iter()
            .filter(|a| a.org_id == org_id)
            .filter_map(|a| {
                let post = posts.get(&a.post_id)?;
                let in_range = from.is_none_or(|f| post.first_seen_at >= f)
                    && to.is_none_or(|e| post.first_seen_at <= e);
                in_range.then(|| ReactionSample {
                    action_type: a.action_type,
                    status: a.status,
                    first_seen_at: post.first_seen_at,
                    completed_at: a.completed_at,
                })
            })
            .collect())
    }
}

#[async_trait]
impl SessionStatus for MemoryStore {
    async fn is_authenticated(&self, user_id: Uuid, platform: Platform) -> Result<bool> {
        Ok(!self
            .lock()
            .signed_out
            .contains(&AccountKey { user_id, platform }))
    }
}
