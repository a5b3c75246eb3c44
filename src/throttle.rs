//! # Throttle — Per-Account Pacing Gate
//!
//! Consulted immediately before every dispatch. Each integration account
//! (`user_id`, `platform`) has one [`PacingState`], mutated only by that
//! account's dispatch worker, so every function here takes `&mut PacingState`
//! and never touches shared state.
//!
//! ## States
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | active | throttled | `failure_threshold` retryable failures in a row within `failure_window` |
//! | throttled | active | `throttled_until` passes with no further failure (each failure pushes it out by `cooldown`) |
//! | any | blocked | one auth-class failure |
//! | blocked | active | the session collaborator reports a valid session again |
//!
//! ## Gate order
//!
//! 1. Cancellation: page deactivated or subscription no longer enables the type.
//! 2. Day roll and throttle recovery.
//! 3. Blocked: requeue at `now + blocked_recheck`, no attempt consumed.
//! 4. Daily cap for the type (weekend-dampened for safe, halved while
//!    throttled): requeue at the next local midnight.
//! 5. Pacing gap since the last attempt (multiplied while throttled).
//!
//! Days and weekends are evaluated in the user's local clock.

use std::sync::Arc;

use anyhow::Result;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborators::SessionStatus;
use crate::config::ThrottleConfig;
use crate::error::{EngineError, FailureClass};
use crate::models::{
    AccountKey, AccountState, ActionType, EngagementAction, PacingState, RiskProfile,
    UserSettings,
};
use crate::scheduler::user_offset;
use crate::subscriptions::SubscriptionResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    Blocked,
    DailyCap,
    Pacing,
}

impl DeferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferReason::Blocked => "blocked",
            DeferReason::DailyCap => "daily_cap",
            DeferReason::Pacing => "pacing",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    /// Return the action to `pending` until `until`.
    Defer {
        until: DateTime<Utc>,
        reason: DeferReason,
        detail: String,
    },
    /// Fail the action as `cancelled` without dispatching.
    Cancel { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub key: AccountKey,
    pub from: AccountState,
    pub to: AccountState,
    pub reason: String,
}

/// Result of one dispatch attempt as seen by the pacing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Completed,
    Failed(FailureClass),
}

fn transition(state: &mut PacingState, to: AccountState, reason: &str) -> Option<StateChange> {
    if state.state == to {
        return None;
    }
    let change = StateChange {
        key: state.key(),
        from: state.state,
        to,
        reason: reason.to_string(),
    };
    state.state = to;
    Some(change)
}

// ── Local calendar ──────────────────────────────────────────────

pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Start of the next local day as a UTC instant.
pub fn next_local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let tomorrow = local_date(now, offset)
        .succ_opt()
        .unwrap_or(NaiveDate::MAX);
    offset
        .from_local_datetime(&tomorrow.and_time(NaiveTime::MIN))
        .single()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now + Duration::days(1))
}

/// Reset daily counters when the local date has moved on.
pub fn roll_day(state: &mut PacingState, today: NaiveDate) -> bool {
    if state.day_window_start == today {
        return false;
    }
    state.daily_like_count = 0;
    state.daily_comment_count = 0;
    state.day_window_start = today;
    true
}

// ── Pure state machine ──────────────────────────────────────────

/// Leave `throttled` once the cool-down has passed.
pub fn recover(state: &mut PacingState, now: DateTime<Utc>) -> Option<StateChange> {
    if state.state != AccountState::Throttled {
        return None;
    }
    if state.throttled_until.is_some_and(|until| until > now) {
        return None;
    }
    state.throttled_until = None;
    state.consecutive_failures = 0;
    transition(state, AccountState::Active, "cooldown elapsed")
}

/// Effective daily cap for one type on the given local date.
pub fn effective_cap(
    config: &ThrottleConfig,
    profile: RiskProfile,
    state: AccountState,
    action_type: ActionType,
    local_day: NaiveDate,
) -> u32 {
    let limits = config.limits(profile);
    let mut cap = limits.daily_cap(action_type) as f64;
    if profile == RiskProfile::Safe && matches!(local_day.weekday(), Weekday::Sat | Weekday::Sun) {
        cap *= limits.weekend_factor.clamp(0.0, 1.0);
    }
    if state == AccountState::Throttled {
        cap /= 2.0;
    }
    cap.floor() as u32
}

/// Minimum spacing between attempts for the account right now.
pub fn pacing_gap(config: &ThrottleConfig, profile: RiskProfile, state: AccountState) -> Duration {
    let base = config.limits(profile).pacing_gap_secs as i64;
    let factor = if state == AccountState::Throttled {
        config.pacing_multiplier.max(1) as i64
    } else {
        1
    };
    Duration::seconds(base.saturating_mul(factor))
}

/// Cap and pacing checks for an account that is not blocked.
pub fn check_limits(
    state: &PacingState,
    action_type: ActionType,
    config: &ThrottleConfig,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> GateDecision {
    let today = local_date(now, offset);
    let cap = effective_cap(config, state.risk_profile, state.state, action_type, today);
    let used = state.daily_count(action_type).max(0) as u32;
    if used >= cap {
        return GateDecision::Defer {
            until: next_local_midnight(now, offset),
            reason: DeferReason::DailyCap,
            detail: EngineError::DailyCapExceeded {
                action_type: action_type.to_string(),
                cap,
            }
            .to_string(),
        };
    }
    if let Some(last) = state.last_action_at {
        let next = last + pacing_gap(config, state.risk_profile, state.state);
        if next > now {
            return GateDecision::Defer {
                until: next,
                reason: DeferReason::Pacing,
                detail: format!("pacing until {}", next.to_rfc3339()),
            };
        }
    }
    GateDecision::Allow
}

/// Fold one attempt result into the pacing state.
pub fn apply_result(
    state: &mut PacingState,
    action_type: ActionType,
    result: AttemptResult,
    config: &ThrottleConfig,
    now: DateTime<Utc>,
) -> Option<StateChange> {
    state.last_action_at = Some(now);
    match result {
        AttemptResult::Completed => {
            state.consecutive_failures = 0;
            match action_type {
                ActionType::Like => state.daily_like_count += 1,
                ActionType::Comment => state.daily_comment_count += 1,
            }
            None
        }
        AttemptResult::Failed(FailureClass::Retryable) => {
            let in_window = state
                .last_failure_at
                .is_some_and(|at| now - at <= config.failure_window());
            state.consecutive_failures = if in_window {
                state.consecutive_failures.saturating_add(1)
            } else {
                1
            };
            state.last_failure_at = Some(now);
            match state.state {
                AccountState::Throttled => {
                    state.throttled_until = Some(now + config.cooldown());
                    None
                }
                AccountState::Active
                    if state.consecutive_failures >= config.failure_threshold as i32 =>
                {
                    state.throttled_until = Some(now + config.cooldown());
                    let reason = format!("{} consecutive failures", state.consecutive_failures);
                    transition(state, AccountState::Throttled, &reason)
                }
                _ => None,
            }
        }
        AttemptResult::Failed(FailureClass::Terminal) => None,
        AttemptResult::Failed(FailureClass::Auth) => {
            state.throttled_until = None;
            transition(state, AccountState::Blocked, "authentication failure")
        }
    }
}

// ── Controller ──────────────────────────────────────────────────

/// Async wrapper adding the collaborator checks around the pure gate.
pub struct ThrottleController {
    config: ThrottleConfig,
    subscriptions: SubscriptionResolver,
    sessions: Arc<dyn SessionStatus>,
}

impl ThrottleController {
    pub fn new(
        config: ThrottleConfig,
        subscriptions: SubscriptionResolver,
        sessions: Arc<dyn SessionStatus>,
    ) -> Self {
        ThrottleController {
            config,
            subscriptions,
            sessions,
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Decide whether `action` may dispatch now. State changes made on the
    /// way (recovery, unblock) are returned for auditing.
    pub async fn gate(
        &self,
        state: &mut PacingState,
        action: &EngagementAction,
        settings: &UserSettings,
        now: DateTime<Utc>,
    ) -> Result<(GateDecision, Vec<StateChange>)> {
        let mut changes = Vec::new();

        if !self
            .subscriptions
            .still_wanted(action.tracked_page_id, action.user_id, action.action_type)
            .await?
        {
            return Ok((
                GateDecision::Cancel {
                    reason: "subscription disabled or page inactive".into(),
                },
                changes,
            ));
        }

        let offset = user_offset(settings);
        state.risk_profile = settings.risk_profile;
        changes.extend(self.maintain(state, offset, now));

        changes.extend(self.recheck_session(state).await);
        if state.state == AccountState::Blocked {
            return Ok((
                GateDecision::Defer {
                    until: now + self.config.blocked_recheck(),
                    reason: DeferReason::Blocked,
                    detail: "account blocked pending reauthorization".into(),
                },
                changes,
            ));
        }

        let decision = check_limits(state, action.action_type, &self.config, offset, now);
        if let GateDecision::Defer { reason, until, .. } = &decision {
            debug!(account = %state.key(), action_id = %action.id, reason = reason.as_str(), %until, "Gate deferred");
        }
        Ok((decision, changes))
    }

    /// Unblock a blocked account whose session is valid again.
    pub async fn recheck_session(&self, state: &mut PacingState) -> Option<StateChange> {
        if state.state != AccountState::Blocked {
            return None;
        }
        match self
            .sessions
            .is_authenticated(state.user_id, state.platform)
            .await
        {
            Ok(true) => {
                state.consecutive_failures = 0;
                transition(state, AccountState::Active, "session renewed")
            }
            Ok(false) => None,
            Err(e) => {
                warn!(account = %state.key(), error = %e, "Session check failed");
                None
            }
        }
    }

    /// Day roll plus throttle recovery; safe to call at any time.
    pub fn maintain(
        &self,
        state: &mut PacingState,
        offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Option<StateChange> {
        if roll_day(state, local_date(now, offset)) {
            debug!(account = %state.key(), "Daily counters reset");
        }
        let change = recover(state, now);
        if let Some(c) = &change {
            info!(account = %c.key, "Throttle cool-down elapsed");
        }
        change
    }

    pub fn record(
        &self,
        state: &mut PacingState,
        action_type: ActionType,
        result: AttemptResult,
        now: DateTime<Utc>,
    ) -> Option<StateChange> {
        apply_result(state, action_type, result, &self.config, now)
    }
}
