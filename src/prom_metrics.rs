//! # Prometheus Metrics — Engine Exposition
//!
//! Exposes engine activity in the Prometheus text exposition format for
//! scraping by Prometheus, Grafana Agent, or any OpenMetrics-compatible
//! collector.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `autoengage_posts_discovered_total` | Counter | `source` | Posts created (race winners only) |
//! | `autoengage_discovery_duplicates_total` | Counter | `source` | Events that lost the creation race |
//! | `autoengage_trigger_outcomes_total` | Counter | `status` | Realtime trigger results |
//! | `autoengage_polls_total` | Counter | `status` | Poll cycles by result |
//! | `autoengage_actions_created_total` | Counter | `action_type` | Fan-out actions created |
//! | `autoengage_dispatch_outcomes_total` | Counter | `action_type`, `outcome` | Dispatch attempt results |
//! | `autoengage_gate_deferrals_total` | Counter | `reason` | Actions requeued by the throttle gate |
//! | `autoengage_compliance_rewrites_total` | Counter | — | Comments repaired by the compliance stage |
//! | `autoengage_compliance_rejections_total` | Counter | — | Comment actions failed for content policy |
//! | `autoengage_accounts_throttled` | Gauge | — | Accounts currently throttled |
//! | `autoengage_accounts_blocked` | Gauge | — | Accounts currently blocked |
//! | `autoengage_dispatch_workers` | Gauge | — | Live per-account worker tasks |
//! | `autoengage_http_request_duration_seconds` | Histogram | `method`, `path` | HTTP handler latency |
//!
//! The `/metrics` endpoint renders the current registry state on each scrape.
//! Account gauges are recomputed from pacing rows by the maintenance loop.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct SourceLabel {
    pub source: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct StatusLabel {
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct ActionTypeLabel {
    pub action_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct OutcomeLabels {
    pub action_type: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct ReasonLabel {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

/// Thread-safe metrics registry for the engine.
///
/// All fields use atomic types and are safe to update from any task.
pub struct Metrics {
    pub registry: Registry,
    pub posts_discovered: Family<SourceLabel, Counter>,
    pub discovery_duplicates: Family<SourceLabel, Counter>,
    pub trigger_outcomes: Family<StatusLabel, Counter>,
    pub polls: Family<StatusLabel, Counter>,
    pub actions_created: Family<ActionTypeLabel, Counter>,
    pub dispatch_outcomes: Family<OutcomeLabels, Counter>,
    pub gate_deferrals: Family<ReasonLabel, Counter>,
    pub compliance_rewrites: Counter,
    pub compliance_rejections: Counter,
    pub accounts_throttled: Gauge,
    pub accounts_blocked: Gauge,
    pub dispatch_workers: Gauge,
    pub http_request_duration: Family<HttpLabel, Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let posts_discovered = Family::<SourceLabel, Counter>::default();
        registry.register(
            "autoengage_posts_discovered",
            "Posts created, by discovery source",
            posts_discovered.clone(),
        );

        let discovery_duplicates = Family::<SourceLabel, Counter>::default();
        registry.register(
            "autoengage_discovery_duplicates",
            "Discovery events that lost the post creation race",
            discovery_duplicates.clone(),
        );

        let trigger_outcomes = Family::<StatusLabel, Counter>::default();
        registry.register(
            "autoengage_trigger_outcomes",
            "Realtime link trigger results",
            trigger_outcomes.clone(),
        );

        let polls = Family::<StatusLabel, Counter>::default();
        registry.register("autoengage_polls", "Poll cycles by result", polls.clone());

        let actions_created = Family::<ActionTypeLabel, Counter>::default();
        registry.register(
            "autoengage_actions_created",
            "Engagement actions created by fan-out",
            actions_created.clone(),
        );

        let dispatch_outcomes = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "autoengage_dispatch_outcomes",
            "Dispatch attempt results by action type and outcome",
            dispatch_outcomes.clone(),
        );

        let gate_deferrals = Family::<ReasonLabel, Counter>::default();
        registry.register(
            "autoengage_gate_deferrals",
            "Actions requeued by the throttle gate",
            gate_deferrals.clone(),
        );

        let compliance_rewrites = Counter::default();
        registry.register(
            "autoengage_compliance_rewrites",
            "Comments repaired by the compliance stage",
            compliance_rewrites.clone(),
        );

        let compliance_rejections = Counter::default();
        registry.register(
            "autoengage_compliance_rejections",
            "Comment actions failed for content policy",
            compliance_rejections.clone(),
        );

        let accounts_throttled = Gauge::default();
        registry.register(
            "autoengage_accounts_throttled",
            "Accounts currently throttled",
            accounts_throttled.clone(),
        );

        let accounts_blocked = Gauge::default();
        registry.register(
            "autoengage_accounts_blocked",
            "Accounts currently blocked",
            accounts_blocked.clone(),
        );

        let dispatch_workers = Gauge::default();
        registry.register(
            "autoengage_dispatch_workers",
            "Live per-account dispatch worker tasks",
            dispatch_workers.clone(),
        );

        let http_request_duration =
            Family::<HttpLabel, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            });
        registry.register(
            "autoengage_http_request_duration_seconds",
            "HTTP request duration by method and normalized path",
            http_request_duration.clone(),
        );

        Self {
            registry,
            posts_discovered,
            discovery_duplicates,
            trigger_outcomes,
            polls,
            actions_created,
            dispatch_outcomes,
            gate_deferrals,
            compliance_rewrites,
            compliance_rejections,
            accounts_throttled,
            accounts_blocked,
            dispatch_workers,
            http_request_duration,
        }
    }

    pub fn record_discovered(&self, source: &str) {
        self.posts_discovered
            .get_or_create(&SourceLabel {
                source: source.to_string(),
            })
            .inc();
    }

    pub fn record_duplicate(&self, source: &str) {
        self.discovery_duplicates
            .get_or_create(&SourceLabel {
                source: source.to_string(),
            })
            .inc();
    }

    pub fn record_trigger(&self, status: &str) {
        self.trigger_outcomes
            .get_or_create(&StatusLabel {
                status: status.to_string(),
            })
            .inc();
    }

    pub fn record_poll(&self, status: &str) {
        self.polls
            .get_or_create(&StatusLabel {
                status: status.to_string(),
            })
            .inc();
    }

    pub fn record_created(&self, action_type: &str, n: u64) {
        self.actions_created
            .get_or_create(&ActionTypeLabel {
                action_type: action_type.to_string(),
            })
            .inc_by(n);
    }

    pub fn record_outcome(&self, action_type: &str, outcome: &str) {
        self.dispatch_outcomes
            .get_or_create(&OutcomeLabels {
                action_type: action_type.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_deferral(&self, reason: &str) {
        self.gate_deferrals
            .get_or_create(&ReasonLabel {
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        // Writing into a String cannot fail.
        let _ = encode(&mut buf, &self.registry);
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
