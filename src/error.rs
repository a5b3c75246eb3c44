//! # Error — Engine Failure Taxonomy
//!
//! Domain errors raised along the discovery → dispatch path, plus the
//! classification of Action Sink failures into retry classes.
//!
//! | Error | Handling |
//! |-------|----------|
//! | `UnresolvedPage` | dropped, logged, surfaced as a suggestion |
//! | `DuplicatePost` | lost the creation race, dropped silently |
//! | `RateLimited` / `TransientNetwork` | retried with backoff, drives throttling |
//! | `AuthExpired` | account moves to `blocked` |
//! | `ContentPolicyViolation` | action fails, never retried |
//! | `DailyCapExceeded` | deferral to the next local day, not a failure |
//! | `Cancelled` | subscription or page disabled before dispatch |
//!
//! Plumbing code uses `anyhow::Result`; these variants travel inside it and
//! are recovered with `downcast_ref` where the caller branches on them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("no active tracked page matches {url}")]
    UnresolvedPage { url: String },

    #[error("unsupported or malformed post url: {url}")]
    UnsupportedUrl { url: String },

    #[error("post {external_post_id} already recorded")]
    DuplicatePost { external_post_id: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("content_policy_violation")]
    ContentPolicyViolation { reasons: Vec<String> },

    #[error("daily {action_type} cap of {cap} reached")]
    DailyCapExceeded { action_type: String, cap: u32 },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    /// The sink refused the action for good (missing button, deleted post).
    #[error("rejected: {0}")]
    SinkRejected(String),
}

impl EngineError {
    /// Error for a failed sink result, typed by [`classify_sink_failure`].
    pub fn from_sink_failure(error_class: Option<&str>, message: &str) -> Self {
        let message = message.to_string();
        match classify_sink_failure(error_class, Some(&message)) {
            FailureClass::Auth => EngineError::AuthExpired(message),
            FailureClass::Terminal => EngineError::SinkRejected(message),
            FailureClass::Retryable => match error_class.map(|c| c.trim().to_ascii_lowercase()) {
                Some(c) if c == "rate_limited" || c == "rate_limit" => {
                    EngineError::RateLimited(message)
                }
                _ => EngineError::TransientNetwork(message),
            },
        }
    }

    /// Dispatch retry class for errors that can come out of an attempt.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            EngineError::RateLimited(_) | EngineError::TransientNetwork(_) => {
                Some(FailureClass::Retryable)
            }
            EngineError::AuthExpired(_) => Some(FailureClass::Auth),
            EngineError::ContentPolicyViolation { .. }
            | EngineError::Cancelled { .. }
            | EngineError::SinkRejected(_) => Some(FailureClass::Terminal),
            _ => None,
        }
    }
}

/// How a failed dispatch attempt is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Requeued with exponential backoff until the attempt ceiling.
    Retryable,
    /// Final; the action fails with the sink's message.
    Terminal,
    /// Session is gone; the account is blocked and the action stays pending.
    Auth,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Retryable => "retryable",
            FailureClass::Terminal => "terminal",
            FailureClass::Auth => "auth",
        }
    }
}

/// Messages that mean the target itself is unusable; retrying cannot help.
const PERMANENT_FAILURE_PATTERNS: &[&str] = &[
    "button not found",
    "comment box not found",
    "already liked",
    "not found",
    "could not be completed",
];

/// Messages that mean the account's session is gone, including redirects to
/// the login, checkpoint or authwall pages.
const SESSION_FAILURE_PATTERNS: &[&str] = &[
    "session expired",
    "not logged in",
    "login",
    "checkpoint",
    "authwall",
    "invalid session",
];

/// Classify a sink failure from its optional class tag and message.
///
/// An explicit class wins; otherwise the message is matched against known
/// permanent and session patterns, and anything unrecognized is retryable.
pub fn classify_sink_failure(error_class: Option<&str>, message: Option<&str>) -> FailureClass {
    if let Some(class) = error_class {
        return match class.trim().to_ascii_lowercase().as_str() {
            "rate_limited" | "rate_limit" | "transient_network" | "network" | "timeout"
            | "retryable" => FailureClass::Retryable,
            "auth" | "auth_expired" | "unauthenticated" => FailureClass::Auth,
            _ => FailureClass::Terminal,
        };
    }

    let msg = message.unwrap_or_default().to_lowercase();
    if SESSION_FAILURE_PATTERNS.iter().any(|p| msg.contains(p)) {
        return FailureClass::Auth;
    }
    if PERMANENT_FAILURE_PATTERNS.iter().any(|p| msg.contains(p)) {
        return FailureClass::Terminal;
    }
    FailureClass::Retryable
}

/// Failure to parse a stored enum discriminant.
#[derive(Debug, Error)]
#[error("invalid {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
