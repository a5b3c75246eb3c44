//! # Scheduler — Fan-out, Stagger and Quiet Hours
//!
//! Turns one newly created post into `pending` engagement actions, one per
//! subscriber per enabled type.
//!
//! ## Timing rules
//!
//! | Type | `scheduled_at` |
//! |------|----------------|
//! | like | `now + like_delay` (zero by default), then quiet-hours deferral |
//! | comment | previous comment time + `uniform(window_min, window_max)`, starting from `now`, then quiet-hours deferral |
//!
//! Comments follow subscription creation order. A deferred comment moves the
//! cursor to its deferred time, so the times for one post stay strictly
//! increasing even when members have different quiet windows.
//!
//! ## Quiet hours
//!
//! A window `[start, end)` in the user's local clock (`utc_offset_minutes`),
//! wrapping midnight when `start > end`. A time inside it is moved to exactly
//! the window's end instant. The org kill switch or the user's own toggle
//! disables deferral; `start == end` is an empty window.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::NewAuditEntry;
use crate::collaborators::SessionStatus;
use crate::config::SchedulerConfig;
use crate::models::{
    ActionType, EngagementAction, NewAction, OrgSettings, Post, Subscription, TrackedPage,
    UserSettings,
};
use crate::prom_metrics::Metrics;
use crate::store::Store;
use crate::subscriptions::SubscriptionResolver;

// ── Quiet hours ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuietWindow {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

/// `[start, end)` membership, wrapping midnight when `start > end`.
pub fn time_in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start < end {
        t >= start && t < end
    } else {
        t >= start || t < end
    }
}

/// The user's local clock offset; out-of-range values fall back to UTC.
pub fn user_offset(settings: &UserSettings) -> FixedOffset {
    FixedOffset::east_opt(settings.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
}

impl QuietWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, offset: FixedOffset) -> Self {
        QuietWindow { start, end, offset }
    }

    /// `None` when deferral is disabled for this user.
    pub fn for_user(settings: &UserSettings, org: &OrgSettings) -> Option<Self> {
        if !org.quiet_hours_enabled || !settings.quiet_hours_enabled {
            return None;
        }
        if settings.quiet_hours_start == settings.quiet_hours_end {
            return None;
        }
        Some(QuietWindow::new(
            settings.quiet_hours_start,
            settings.quiet_hours_end,
            user_offset(settings),
        ))
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        time_in_window(at.with_timezone(&self.offset).time(), self.start, self.end)
    }

    /// The window's end instant when `at` is inside the window.
    pub fn defer(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.contains(at) {
            return None;
        }
        let local = at.with_timezone(&self.offset);
        let mut day = local.date_naive();
        // Evening half of a window that wraps midnight ends tomorrow.
        if local.time() >= self.end {
            day = day.succ_opt()?;
        }
        self.offset
            .from_local_datetime(&day.and_time(self.end))
            .single()
            .map(|d| d.with_timezone(&Utc))
    }
}

fn apply_quiet(window: Option<&QuietWindow>, at: DateTime<Utc>) -> (DateTime<Utc>, bool) {
    match window.and_then(|w| w.defer(at)) {
        Some(deferred) => (deferred, true),
        None => (at, false),
    }
}

// ── Stagger ─────────────────────────────────────────────────────

/// Inclusive bounds for the gap between consecutive comments on one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaggerWindow {
    pub min_secs: i64,
    pub max_secs: i64,
}

impl StaggerWindow {
    /// Org bounds override engine defaults. The minimum gap is one second.
    pub fn resolve(config: &SchedulerConfig, org: &OrgSettings) -> Self {
        let min = org
            .comment_window_min_secs
            .map(i64::from)
            .unwrap_or(config.comment_window_min_secs as i64)
            .max(1);
        let max = org
            .comment_window_max_secs
            .map(i64::from)
            .unwrap_or(config.comment_window_max_secs as i64)
            .max(min);
        StaggerWindow {
            min_secs: min,
            max_secs: max,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::seconds(rng.gen_range(self.min_secs..=self.max_secs))
    }
}

// ── Planning ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub user_id: uuid::Uuid,
    pub action_type: ActionType,
    pub scheduled_at: DateTime<Utc>,
    pub deferred: bool,
}

/// Compute `scheduled_at` for every enabled `(member, type)` of one post.
///
/// `members` must already be in subscription order.
pub fn plan_fan_out<R: Rng + ?Sized>(
    now: DateTime<Utc>,
    members: &[(Subscription, UserSettings)],
    org: &OrgSettings,
    config: &SchedulerConfig,
    rng: &mut R,
) -> Vec<PlannedAction> {
    let stagger = StaggerWindow::resolve(config, org);
    let like_delay = Duration::seconds(config.like_delay_secs as i64);
    let mut cursor = now;
    let mut planned = Vec::new();

    for (sub, settings) in members {
        let quiet = QuietWindow::for_user(settings, org);
        if sub.auto_like {
            let (at, deferred) = apply_quiet(quiet.as_ref(), now + like_delay);
            planned.push(PlannedAction {
                user_id: sub.user_id,
                action_type: ActionType::Like,
                scheduled_at: at,
                deferred,
            });
        }
        if sub.auto_comment {
            let (at, deferred) = apply_quiet(quiet.as_ref(), cursor + stagger.sample(rng));
            cursor = at;
            planned.push(PlannedAction {
                user_id: sub.user_id,
                action_type: ActionType::Comment,
                scheduled_at: at,
                deferred,
            });
        }
    }
    planned
}

// ── Fan-out ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct FanOutReport {
    pub likes_created: u32,
    pub comments_created: u32,
    pub skipped_duplicate: u32,
    pub skipped_no_session: u32,
    pub deferred_quiet_hours: u32,
    #[serde(skip)]
    pub actions: Vec<EngagementAction>,
}

impl FanOutReport {
    pub fn created(&self) -> u32 {
        self.likes_created + self.comments_created
    }
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    subscriptions: SubscriptionResolver,
    sessions: Arc<dyn SessionStatus>,
    config: SchedulerConfig,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<dyn SessionStatus>,
        config: SchedulerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Scheduler {
            subscriptions: SubscriptionResolver::new(store.clone()),
            store,
            sessions,
            config,
            metrics,
        }
    }

    /// Create the pending actions for a post this process just created.
    ///
    /// Subscribers without a valid session are skipped. A session lookup
    /// failure schedules anyway; the dispatch gate re-checks the account.
    pub async fn fan_out<R: Rng + Send + ?Sized>(
        &self,
        post: &Post,
        page: &TrackedPage,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<FanOutReport> {
        let mut report = FanOutReport::default();
        let mut members = Vec::new();
        for sub in self.subscriptions.engaged(page.id).await? {
            match self.sessions.is_authenticated(sub.user_id, page.platform).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(user_id = %sub.user_id, platform = %page.platform, "No session, skipping");
                    report.skipped_no_session += 1;
                    continue;
                }
                Err(e) => {
                    warn!(user_id = %sub.user_id, error = %e, "Session check failed, scheduling anyway");
                }
            }
            let settings = self.store.user_settings(sub.user_id).await?;
            members.push((sub, settings));
        }

        let org = self.store.org_settings(page.org_id).await?;
        let planned = plan_fan_out(now, &members, &org, &self.config, rng);

        for plan in planned {
            let created = self
                .store
                .create_action(NewAction {
                    post_id: post.id,
                    user_id: plan.user_id,
                    org_id: page.org_id,
                    tracked_page_id: page.id,
                    platform: page.platform,
                    action_type: plan.action_type,
                    scheduled_at: plan.scheduled_at,
                })
                .await
                .context("create engagement action")?;
            let Some(action) = created else {
                report.skipped_duplicate += 1;
                continue;
            };
            match action.action_type {
                ActionType::Like => report.likes_created += 1,
                ActionType::Comment => report.comments_created += 1,
            }
            if plan.deferred {
                report.deferred_quiet_hours += 1;
            }
            report.actions.push(action);
        }

        self.metrics
            .record_created(ActionType::Like.as_str(), report.likes_created as u64);
        self.metrics
            .record_created(ActionType::Comment.as_str(), report.comments_created as u64);
        self.store
            .append_audit(NewAuditEntry::fan_out(page.org_id, post, &report))
            .await
            .context("append fan-out audit entry")?;

        info!(
            post_id = %post.id,
            likes = report.likes_created,
            comments = report.comments_created,
            skipped_duplicate = report.skipped_duplicate,
            skipped_no_session = report.skipped_no_session,
            deferred = report.deferred_quiet_hours,
            "Fan-out complete"
        );
        Ok(report)
    }
}
