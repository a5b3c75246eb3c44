//! # Audit — Typed Audit Trail Events
//!
//! Every dispatch attempt and every fan-out decision appends one
//! `AuditLogEntry`. The entry's `metadata` column holds an [`AuditEvent`], a
//! tagged union of the shapes the engine writes, plus an [`AuditEvent::Other`]
//! variant so rows written by external tools still decode.
//!
//! ## Action strings
//!
//! | Event | `action` column | `target_type` |
//! |-------|-----------------|---------------|
//! | `ActionAttempt` | `{type}_{outcome}` e.g. `comment_completed` | `post` |
//! | `FanOut` | `post_fanout` | `post` |
//! | `AccountStateChanged` | `account_{state}` | `integration` |
//! | `DiscoverySuggestion` | `discovery_unmatched` | `url` |
//!
//! CSV export columns: `id,user_id,action,target_type,target_id,created_at,metadata`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureClass;
use crate::models::{AccountKey, AccountState, ActionType, AuditLogEntry, EngagementAction, Post};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    ActionAttempt {
        action_id: Uuid,
        post_id: Uuid,
        action_type: ActionType,
        outcome: AttemptOutcome,
        attempt: i32,
        scheduled_at: DateTime<Utc>,
        attempted_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        post_url: Option<String>,
    },
    FanOut {
        post_id: Uuid,
        tracked_page_id: Uuid,
        likes_created: u32,
        comments_created: u32,
        skipped_duplicate: u32,
        skipped_no_session: u32,
        deferred_quiet_hours: u32,
    },
    AccountStateChanged {
        platform: crate::models::Platform,
        from: AccountState,
        to: AccountState,
        reason: String,
    },
    DiscoverySuggestion {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_label: Option<String>,
    },
    /// Shapes not produced by this engine.
    Other {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// Result of one dispatch attempt as recorded in the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Completed,
    Retrying,
    Failed,
    Blocked,
    Cancelled,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Completed => "completed",
            AttemptOutcome::Retrying => "retrying",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }

    pub fn from_failure(class: FailureClass, exhausted: bool) -> Self {
        match class {
            FailureClass::Retryable if !exhausted => AttemptOutcome::Retrying,
            FailureClass::Auth => AttemptOutcome::Blocked,
            _ => AttemptOutcome::Failed,
        }
    }
}

/// Insert payload for the audit trail.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub metadata: AuditEvent,
}

impl NewAuditEntry {
    pub fn attempt(
        action: &EngagementAction,
        outcome: AttemptOutcome,
        attempted_at: DateTime<Utc>,
        comment_text: Option<String>,
        error: Option<String>,
        post_url: Option<String>,
    ) -> Self {
        let completed_at = (outcome == AttemptOutcome::Completed).then_some(attempted_at);
        NewAuditEntry {
            org_id: action.org_id,
            user_id: Some(action.user_id),
            action: format!("{}_{}", action.action_type, outcome.as_str()),
            target_type: Some("post".into()),
            target_id: Some(action.post_id.to_string()),
            metadata: AuditEvent::ActionAttempt {
                action_id: action.id,
                post_id: action.post_id,
                action_type: action.action_type,
                outcome,
                attempt: action.attempts,
                scheduled_at: action.scheduled_at,
                attempted_at,
                completed_at,
                comment_text,
                error,
                post_url,
            },
        }
    }

    pub fn fan_out(org_id: Uuid, post: &Post, report: &crate::scheduler::FanOutReport) -> Self {
        NewAuditEntry {
            org_id,
            user_id: None,
            action: "post_fanout".into(),
            target_type: Some("post".into()),
            target_id: Some(post.id.to_string()),
            metadata: AuditEvent::FanOut {
                post_id: post.id,
                tracked_page_id: post.tracked_page_id,
                likes_created: report.likes_created,
                comments_created: report.comments_created,
                skipped_duplicate: report.skipped_duplicate,
                skipped_no_session: report.skipped_no_session,
                deferred_quiet_hours: report.deferred_quiet_hours,
            },
        }
    }

    pub fn account_state(
        org_id: Uuid,
        key: AccountKey,
        from: AccountState,
        to: AccountState,
        reason: &str,
    ) -> Self {
        NewAuditEntry {
            org_id,
            user_id: Some(key.user_id),
            action: format!("account_{}", to),
            target_type: Some("integration".into()),
            target_id: Some(key.platform.to_string()),
            metadata: AuditEvent::AccountStateChanged {
                platform: key.platform,
                from,
                to,
                reason: reason.to_string(),
            },
        }
    }

    pub fn suggestion(org_id: Uuid, url: &str, source_label: Option<&str>) -> Self {
        NewAuditEntry {
            org_id,
            user_id: None,
            action: "discovery_unmatched".into(),
            target_type: Some("url".into()),
            target_id: Some(url.to_string()),
            metadata: AuditEvent::DiscoverySuggestion {
                url: url.to_string(),
                source_label: source_label.map(str::to_string),
            },
        }
    }
}

/// Filter for audit queries. All fields optional; results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub org_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl AuditFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 10_000)
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.org_id.is_none_or(|o| entry.org_id == o)
            && self.user_id.is_none_or(|u| entry.user_id == Some(u))
            && self.action.as_deref().is_none_or(|a| entry.action == a)
            && self.from.is_none_or(|f| entry.created_at >= f)
            && self.to.is_none_or(|t| entry.created_at <= t)
    }
}

/// Render audit rows as CSV.
pub fn export_csv(entries: &[AuditLogEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "id",
        "user_id",
        "action",
        "target_type",
        "target_id",
        "created_at",
        "metadata",
    ])?;
    for e in entries {
        let metadata = serde_json::to_string(&e.metadata)?;
        writer.write_record([
            e.id.to_string(),
            e.user_id.map(|u| u.to_string()).unwrap_or_default(),
            e.action.clone(),
            e.target_type.clone().unwrap_or_default(),
            e.target_id.clone().unwrap_or_default(),
            e.created_at.to_rfc3339(),
            metadata,
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("csv flush: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}
