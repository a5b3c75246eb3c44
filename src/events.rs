//! # Events — Bounded Notification Log
//!
//! A bounded, thread-safe event log that collects surfaced engine activity and
//! turns it into notifications and discovery suggestions for the UI.
//!
//! ## Event Types
//!
//! | Variant | Emitted When |
//! |---------|-------------|
//! | `PostDiscovered` | A discovery source won the creation race for a post |
//! | `UnmatchedLink` | A trigger URL matched no active tracked page |
//! | `ActionFailed` | An action reached `failed` (terminal, cancelled, policy) |
//! | `AccountStateChanged` | The throttle state machine moved an account |
//! | `PollFailed` | A poll cycle for a page returned an error |
//! | `Warning` | Non-fatal issues inside background loops |
//!
//! ## Delivery
//!
//! Records live in a `VecDeque` capped at 200 entries. Unmatched links are
//! squashed by URL into suggestions (with a hit count) so a link pasted into
//! five chats surfaces once. Each notification gets a monotonic `id` for
//! client-side deduplication.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{AccountKey, AccountState, ActionType, DiscoverySource};

#[derive(Clone, Debug)]
pub enum EngineEvent {
    PostDiscovered {
        post_id: Uuid,
        tracked_page_id: Uuid,
        source: DiscoverySource,
    },
    UnmatchedLink {
        url: String,
        org_id: Option<Uuid>,
        source_label: Option<String>,
    },
    ActionFailed {
        action_id: Uuid,
        user_id: Uuid,
        action_type: ActionType,
        reason: String,
    },
    AccountStateChanged {
        key: AccountKey,
        from: AccountState,
        to: AccountState,
        reason: String,
    },
    PollFailed {
        tracked_page_id: Uuid,
        error: String,
    },
    Warning {
        context: String,
        message: String,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub id: u64,
    pub kind: String,
    pub title: String,
    pub details: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A link seen by the trigger channel that no tracked page claims.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Suggestion {
    pub url: String,
    pub org_id: Option<Uuid>,
    pub source_label: Option<String>,
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

const RECENT_EVENTS_CAP: usize = 200;
const NOTIFICATIONS_CAP: usize = 50;
const SUGGESTIONS_CAP: usize = 100;

pub struct EventBus {
    recent: Mutex<VecDeque<EventRecord>>,
    notifications: Mutex<VecDeque<Notification>>,
    suggestions: Mutex<VecDeque<Suggestion>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAP)),
            notifications: Mutex::new(VecDeque::with_capacity(NOTIFICATIONS_CAP)),
            suggestions: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn emit(&self, event: EngineEvent) {
        self.emit_at(event, Utc::now());
    }

    pub fn emit_at(&self, event: EngineEvent, at: DateTime<Utc>) {
        match &event {
            EngineEvent::PostDiscovered {
                post_id,
                tracked_page_id,
                source,
            } => {
                info!(%post_id, %tracked_page_id, %source, "Post discovered");
                self.push_record(
                    "post_discovered",
                    &format!("post {} on page {} via {}", post_id, tracked_page_id, source),
                    at,
                );
            }
            EngineEvent::UnmatchedLink {
                url,
                org_id,
                source_label,
            } => {
                info!(%url, "Trigger link matched no tracked page");
                self.push_record("unmatched_link", url, at);
                let first = self.record_suggestion(url, *org_id, source_label.clone(), at);
                if first {
                    self.notify(
                        "suggestion",
                        "Untracked page link observed".into(),
                        vec![url.clone()],
                        at,
                    );
                }
            }
            EngineEvent::ActionFailed {
                action_id,
                user_id,
                action_type,
                reason,
            } => {
                warn!(%action_id, %user_id, %action_type, %reason, "Action failed");
                self.push_record(
                    "action_failed",
                    &format!("{} {} for {}: {}", action_type, action_id, user_id, reason),
                    at,
                );
                self.notify(
                    "action_failed",
                    format!("{} action failed", action_type),
                    vec![reason.clone(), format!("action {}", action_id)],
                    at,
                );
            }
            EngineEvent::AccountStateChanged {
                key,
                from,
                to,
                reason,
            } => {
                warn!(account = %key, %from, %to, %reason, "Account state changed");
                self.push_record(
                    "account_state",
                    &format!("{} {} -> {} ({})", key, from, to, reason),
                    at,
                );
                self.notify(
                    "account_state",
                    format!("Account {} is now {}", key, to),
                    vec![reason.clone()],
                    at,
                );
            }
            EngineEvent::PollFailed {
                tracked_page_id,
                error,
            } => {
                warn!(%tracked_page_id, %error, "Poll failed");
                self.push_record("poll_failed", &format!("[{}] {}", tracked_page_id, error), at);
            }
            EngineEvent::Warning { context, message } => {
                warn!(%context, %message, "Engine warning");
                self.push_record("warning", &format!("[{}] {}", context, message), at);
            }
        }
    }

    pub fn recent_notifications(&self, limit: usize) -> Vec<Notification> {
        lock(&self.notifications)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<EventRecord> {
        lock(&self.recent).iter().rev().take(limit).cloned().collect()
    }

    /// Suggestions, most recently seen first.
    pub fn suggestions(&self, org_id: Option<Uuid>) -> Vec<Suggestion> {
        let mut out: Vec<Suggestion> = lock(&self.suggestions)
            .iter()
            .filter(|s| org_id.is_none() || s.org_id == org_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        out
    }

    /// Returns true when the URL had not been suggested yet.
    fn record_suggestion(
        &self,
        url: &str,
        org_id: Option<Uuid>,
        source_label: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        let mut suggestions = lock(&self.suggestions);
        if let Some(s) = suggestions
            .iter_mut()
            .find(|s| s.url == url && s.org_id == org_id)
        {
            s.count += 1;
            s.last_seen = at;
            if source_label.is_some() {
                s.source_label = source_label;
            }
            return false;
        }
        if suggestions.len() >= SUGGESTIONS_CAP {
            suggestions.pop_front();
        }
        suggestions.push_back(Suggestion {
            url: url.to_string(),
            org_id,
            source_label,
            count: 1,
            first_seen: at,
            last_seen: at,
        });
        true
    }

    fn push_record(&self, kind: &str, message: &str, at: DateTime<Utc>) {
        let mut recent = lock(&self.recent);
        if recent.len() >= RECENT_EVENTS_CAP {
            recent.pop_front();
        }
        recent.push_back(EventRecord {
            kind: kind.into(),
            message: message.into(),
            at,
        });
    }

    fn notify(&self, kind: &str, title: String, details: Vec<String>, at: DateTime<Utc>) {
        let mut notifs = lock(&self.notifications);
        if notifs.len() >= NOTIFICATIONS_CAP {
            notifs.pop_front();
        }
        notifs.push_back(Notification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind: kind.into(),
            title,
            details,
            at,
        });
    }
}
