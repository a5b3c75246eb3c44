//! # Models — Domain Records
//!
//! Rows and value types shared by every stage of the engine. Enum columns are
//! stored as lowercase text and decoded through `TryFrom<String>`, so the same
//! structs serve the PostgreSQL backend (`sqlx::FromRow`), the in-memory store,
//! and the JSON read models.
//!
//! ## Lifecycles
//!
//! - `Post`: created once per `(tracked_page_id, external_post_id)`, never
//!   mutated except for the `content_text` cache.
//! - `EngagementAction`: `pending → scheduled → dispatched → completed | failed`,
//!   with requeues returning to `pending`. Never deleted.
//! - `PacingState`: one row per `(user_id, platform)`, owned by that account's
//!   dispatch worker.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::error::ParseEnumError;

/// Text-backed enum: `as_str`, `Display`, `FromStr` and `TryFrom<String>`.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseEnumError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }
    };
}

// ── Enumerations ────────────────────────────────────────────────

/// Integration platform. Instagram and Facebook share one Meta integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linkedin,
    Meta,
}

text_enum!(Platform, "platform", { Linkedin => "linkedin", Meta => "meta" });

/// Concrete site a post lives on; selects the comment register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Linkedin,
    Instagram,
    Facebook,
}

text_enum!(Surface, "surface", {
    Linkedin => "linkedin",
    Instagram => "instagram",
    Facebook => "facebook",
});

impl Surface {
    pub fn platform(&self) -> Platform {
        match self {
            Surface::Linkedin => Platform::Linkedin,
            Surface::Instagram | Surface::Facebook => Platform::Meta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    CompanyPage,
    PersonalProfile,
    IgBusiness,
    FbPage,
}

text_enum!(PageType, "page_type", {
    CompanyPage => "company_page",
    PersonalProfile => "personal_profile",
    IgBusiness => "ig_business",
    FbPage => "fb_page",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    #[default]
    Normal,
    Hunt,
}

text_enum!(PollingMode, "polling_mode", { Normal => "normal", Hunt => "hunt" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Like,
    Comment,
}

text_enum!(ActionType, "action_type", { Like => "like", Comment => "comment" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Scheduled,
    Dispatched,
    Completed,
    Failed,
}

text_enum!(ActionStatus, "action_status", {
    Pending => "pending",
    Scheduled => "scheduled",
    Dispatched => "dispatched",
    Completed => "completed",
    Failed => "failed",
});

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    #[default]
    Safe,
    Aggro,
}

text_enum!(RiskProfile, "risk_profile", { Safe => "safe", Aggro => "aggro" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountState {
    #[default]
    Active,
    Throttled,
    Blocked,
}

text_enum!(AccountState, "account_state", {
    Active => "active",
    Throttled => "throttled",
    Blocked => "blocked",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    Poll,
    Trigger,
}

text_enum!(DiscoverySource, "discovery_source", { Poll => "poll", Trigger => "trigger" });

// ── Pages, subscriptions, posts ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackedPage {
    pub id: Uuid,
    pub org_id: Uuid,
    #[sqlx(try_from = "String")]
    pub platform: Platform,
    pub external_id: Option<String>,
    pub url: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub page_type: PageType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub tracked_page_id: Uuid,
    pub user_id: Uuid,
    pub auto_like: bool,
    pub auto_comment: bool,
    #[sqlx(try_from = "String")]
    pub polling_mode: PollingMode,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn wants(&self, action_type: ActionType) -> bool {
        match action_type {
            ActionType::Like => self.auto_like,
            ActionType::Comment => self.auto_comment,
        }
    }

    /// Enabled action types in fan-out order (likes first).
    pub fn enabled_types(&self) -> Vec<ActionType> {
        [ActionType::Like, ActionType::Comment]
            .into_iter()
            .filter(|t| self.wants(*t))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub tracked_page_id: Uuid,
    #[sqlx(try_from = "String")]
    pub platform: Platform,
    pub external_post_id: String,
    pub url: String,
    pub content_text: Option<String>,
    #[sqlx(try_from = "String")]
    pub discovered_via: DiscoverySource,
    pub first_seen_at: DateTime<Utc>,
}

/// Insert payload for the create-if-absent entry point.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub tracked_page_id: Uuid,
    pub platform: Platform,
    pub external_post_id: String,
    pub url: String,
    pub content_text: Option<String>,
    pub discovered_via: DiscoverySource,
    pub first_seen_at: DateTime<Utc>,
}

// ── Actions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EngagementAction {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub tracked_page_id: Uuid,
    #[sqlx(try_from = "String")]
    pub platform: Platform,
    #[sqlx(try_from = "String")]
    pub action_type: ActionType,
    #[sqlx(try_from = "String")]
    pub status: ActionStatus,
    pub scheduled_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub comment_text: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EngagementAction {
    pub fn account(&self) -> AccountKey {
        AccountKey {
            user_id: self.user_id,
            platform: self.platform,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAction {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub tracked_page_id: Uuid,
    pub platform: Platform,
    pub action_type: ActionType,
    pub scheduled_at: DateTime<Utc>,
}

/// Terminal or requeue transition applied by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionTransition {
    /// Back to `pending` with a new due time.
    Requeue {
        scheduled_at: DateTime<Utc>,
        error_message: Option<String>,
        /// Give back the attempt `mark_dispatched` counted (auth failures).
        refund_attempt: bool,
    },
    Complete {
        completed_at: DateTime<Utc>,
        comment_text: Option<String>,
    },
    Fail {
        error_message: String,
    },
}

/// Identity of an integration account: one pacing state and one dispatch queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub user_id: Uuid,
    pub platform: Platform,
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.user_id, self.platform)
    }
}

// ── Pacing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PacingState {
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub platform: Platform,
    #[sqlx(try_from = "String")]
    pub risk_profile: RiskProfile,
    #[sqlx(try_from = "String")]
    pub state: AccountState,
    pub consecutive_failures: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub throttled_until: Option<DateTime<Utc>>,
    pub daily_like_count: i32,
    pub daily_comment_count: i32,
    pub day_window_start: NaiveDate,
    pub last_action_at: Option<DateTime<Utc>>,
}

impl PacingState {
    pub fn new(key: AccountKey, risk_profile: RiskProfile, today: NaiveDate) -> Self {
        PacingState {
            user_id: key.user_id,
            platform: key.platform,
            risk_profile,
            state: AccountState::Active,
            consecutive_failures: 0,
            last_failure_at: None,
            throttled_until: None,
            daily_like_count: 0,
            daily_comment_count: 0,
            day_window_start: today,
            last_action_at: None,
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey {
            user_id: self.user_id,
            platform: self.platform,
        }
    }

    pub fn daily_count(&self, action_type: ActionType) -> i32 {
        match action_type {
            ActionType::Like => self.daily_like_count,
            ActionType::Comment => self.daily_comment_count,
        }
    }
}

// ── Compliance inputs ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AvoidPhrase {
    pub id: Uuid,
    /// `None` marks a global default rule.
    pub org_id: Option<Uuid>,
    pub phrase: String,
    pub active: bool,
}

/// Free-form writing style plus typed tone knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub user_id: Uuid,
    #[serde(default)]
    pub profile_text: String,
    #[serde(default)]
    pub tone: ToneSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToneSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji_usage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_comments: Option<String>,
    /// Settings this engine does not interpret; passed to the drafter verbatim.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Audit & status projections ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    #[sqlx(json)]
    pub metadata: AuditEvent,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct PollStatus {
    pub tracked_page_id: Uuid,
    pub last_polled_at: DateTime<Utc>,
    /// `ok` or `error`.
    pub status: String,
    pub posts_found: i32,
    pub new_posts: i32,
    pub error: Option<String>,
}

// ── Settings ────────────────────────────────────────────────────

pub const MIN_POLLING_INTERVAL_SECS: i32 = 60;
pub const MAX_POLLING_INTERVAL_SECS: i32 = 3600;

/// Per-user automation settings, read at every scheduling and gate decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSettings {
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub risk_profile: RiskProfile,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: NaiveTime,
    pub quiet_hours_end: NaiveTime,
    pub polling_interval: i32,
    /// Offset of the user's local clock from UTC; defines quiet hours and day boundaries.
    pub utc_offset_minutes: i32,
}

impl UserSettings {
    pub fn defaults(user_id: Uuid) -> Self {
        UserSettings {
            user_id,
            risk_profile: RiskProfile::Safe,
            quiet_hours_enabled: true,
            quiet_hours_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            quiet_hours_end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            polling_interval: 300,
            utc_offset_minutes: 0,
        }
    }

    pub fn clamp(mut self) -> Self {
        self.polling_interval = self
            .polling_interval
            .clamp(MIN_POLLING_INTERVAL_SECS, MAX_POLLING_INTERVAL_SECS);
        self.utc_offset_minutes = self.utc_offset_minutes.clamp(-14 * 60, 14 * 60);
        self
    }
}

/// Per-organization settings. Unset stagger bounds fall back to engine config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgSettings {
    pub org_id: Uuid,
    /// Org-wide switch: when false no quiet-hours deferral happens for any member.
    pub quiet_hours_enabled: bool,
    pub comment_window_min_secs: Option<i32>,
    pub comment_window_max_secs: Option<i32>,
    pub polling_interval: Option<i32>,
}

impl OrgSettings {
    pub fn defaults(org_id: Uuid) -> Self {
        OrgSettings {
            org_id,
            quiet_hours_enabled: true,
            comment_window_min_secs: None,
            comment_window_max_secs: None,
            polling_interval: None,
        }
    }
}
