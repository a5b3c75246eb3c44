//! # AutoEngage — Engagement Orchestration Engine
//!
//! Discovers new posts on tracked social-media pages, deduplicates them across
//! two racing discovery sources, fans each post out into per-account like and
//! comment actions, paces those actions per account under risk policies and
//! quiet hours, and dispatches compliant comment text through a pluggable
//! Action Sink while recording an append-only audit trail.
//!
//! ## Pipeline
//!
//! ```text
//! poll / trigger ─► identity ─► discovery (insert-if-absent) ─► subscriptions
//!     ─► scheduler (pending actions) ─► throttle gate ─► comments ─► dispatch ─► audit
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`identity`] | Canonical `(platform, external_post_id)` keys and page attribution |
//! | [`discovery`] | Poll/trigger aggregation, poll cadence planning |
//! | [`subscriptions`] | Ordered subscriber lookup |
//! | [`scheduler`] | Fan-out, comment stagger, quiet-hours deferral |
//! | [`throttle`] | Per-account pacing state machine and daily caps |
//! | [`comments`] | Draft + compliance comment pipeline |
//! | [`dispatch`] | Per-account worker actors, sink invocation, retries, audit |
//! | [`store`] / [`db`] | Persistence trait, in-memory and PostgreSQL backends |
//! | [`engine`] | Wiring and background loops |
//! | [`dashboard`] | HTTP read models and the realtime trigger webhook |

pub mod analytics;
pub mod audit;
pub mod collaborators;
pub mod comments;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod discovery;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod models;
pub mod prom_metrics;
pub mod scheduler;
pub mod store;
pub mod subscriptions;
pub mod throttle;

pub use engine::Engine;
pub use error::{EngineError, FailureClass};
pub use store::{MemoryStore, Store};
