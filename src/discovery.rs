//! # Discovery — Poll and Trigger Aggregation
//!
//! Two channels race to report the same post:
//!
//! - **Polling**: per tracked page, on a cadence planned by
//!   [`next_poll_interval`]. Normal pages poll every 5-15 minutes; a page with
//!   a hunt-mode subscriber polls every 30-60 seconds while that subscriber's
//!   local clock is inside the hunt window.
//! - **Realtime trigger**: a single URL from a message-monitoring
//!   collaborator, delivered over the HTTP webhook.
//!
//! Both resolve through [`IdentityResolver`] to `(tracked_page_id,
//! external_post_id)` and call `insert_post_if_absent`. Only the writer that
//! creates the row fans out; the loser counts a duplicate and stops. Poll
//! cycles always write a [`PollStatus`]; triggers never do.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::NewAuditEntry;
use crate::collaborators::{PolledPost, PostSource};
use crate::config::DiscoveryConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::identity::{IdentityResolver, RawHit, ResolvedPost};
use crate::models::{
    DiscoverySource, NewPost, OrgSettings, PollStatus, PollingMode, Post, TrackedPage,
    MAX_POLLING_INTERVAL_SECS, MIN_POLLING_INTERVAL_SECS,
};
use crate::prom_metrics::Metrics;
use crate::scheduler::{time_in_window, user_offset, FanOutReport, Scheduler};
use crate::store::Store;
use crate::subscriptions::SubscriptionResolver;

// ── Poll planning ───────────────────────────────────────────────

/// Delay until the next poll of a page.
///
/// Hunt cadence only while `hunting_now`; otherwise normal cadence, never
/// shorter than the org's `polling_interval`.
pub fn next_poll_interval<R: Rng + ?Sized>(
    hunting_now: bool,
    org: &OrgSettings,
    config: &DiscoveryConfig,
    rng: &mut R,
) -> Duration {
    let uniform = |rng: &mut R, lo: u64, hi: u64| {
        let lo = lo.max(1);
        rng.gen_range(lo..=hi.max(lo)) as i64
    };
    if hunting_now {
        return Duration::seconds(uniform(
            rng,
            config.hunt_interval_min_secs,
            config.hunt_interval_max_secs,
        ));
    }
    let secs = uniform(
        rng,
        config.normal_interval_min_secs,
        config.normal_interval_max_secs,
    );
    let floor = org
        .polling_interval
        .map(|p| p.clamp(MIN_POLLING_INTERVAL_SECS, MAX_POLLING_INTERVAL_SECS) as i64)
        .unwrap_or(0);
    Duration::seconds(secs.max(floor))
}

// ── Trigger outcome ─────────────────────────────────────────────

/// Payload of the realtime link trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkTrigger {
    pub url: String,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_label: Option<String>,
    /// Restricts page matching to one organization when set.
    #[serde(default)]
    pub org_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Not a supported social link.
    Ignored { reason: String },
    /// This trigger created the post and fanned it out.
    Matched {
        post_id: Uuid,
        tracked_page_id: Uuid,
        actions_created: u32,
    },
    /// The post already existed; nothing was scheduled.
    Duplicate {
        tracked_page_id: Uuid,
        external_post_id: String,
    },
    /// Supported link, but no active tracked page claims it.
    Unmatched { url: String },
}

impl TriggerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOutcome::Ignored { .. } => "ignored",
            TriggerOutcome::Matched { .. } => "matched",
            TriggerOutcome::Duplicate { .. } => "duplicate",
            TriggerOutcome::Unmatched { .. } => "unmatched",
        }
    }
}

/// Outcome of offering one resolved post to the create-if-absent entry point.
enum Offer {
    Created(Post, FanOutReport),
    Duplicate,
}

// ── Aggregator ──────────────────────────────────────────────────

pub struct Discovery {
    store: Arc<dyn Store>,
    identity: IdentityResolver,
    scheduler: Arc<Scheduler>,
    subscriptions: SubscriptionResolver,
    source: Arc<dyn PostSource>,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
    config: DiscoveryConfig,
    in_flight: Mutex<HashSet<Uuid>>,
    next_due: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Discovery {
    pub fn new(
        store: Arc<dyn Store>,
        identity: IdentityResolver,
        scheduler: Arc<Scheduler>,
        source: Arc<dyn PostSource>,
        events: Arc<EventBus>,
        metrics: Arc<Metrics>,
        config: DiscoveryConfig,
    ) -> Self {
        Discovery {
            subscriptions: SubscriptionResolver::new(store.clone()),
            store,
            identity,
            scheduler,
            source,
            events,
            metrics,
            config,
            in_flight: Mutex::new(HashSet::new()),
            next_due: Mutex::new(HashMap::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn offer<R: Rng + Send + ?Sized>(
        &self,
        resolved: &ResolvedPost,
        page: &TrackedPage,
        source: DiscoverySource,
        content_text: Option<String>,
        first_seen_at: DateTime<Utc>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Offer> {
        let created = self
            .store
            .insert_post_if_absent(NewPost {
                tracked_page_id: resolved.tracked_page_id,
                platform: resolved.platform,
                external_post_id: resolved.external_post_id.clone(),
                url: resolved.canonical_url.clone(),
                content_text,
                discovered_via: source,
                first_seen_at,
            })
            .await
            .context("insert post")?;

        let Some(post) = created else {
            let dup = EngineError::DuplicatePost {
                external_post_id: resolved.external_post_id.clone(),
            };
            debug!(source = %source, error = %dup, "Lost creation race");
            self.metrics.record_duplicate(source.as_str());
            return Ok(Offer::Duplicate);
        };

        self.metrics.record_discovered(source.as_str());
        self.events.emit_at(
            EngineEvent::PostDiscovered {
                post_id: post.id,
                tracked_page_id: page.id,
                source,
            },
            now,
        );
        let report = self.scheduler.fan_out(&post, page, now, rng).await?;
        Ok(Offer::Created(post, report))
    }

    // ── Polling ─────────────────────────────────────────────────

    /// Fold one poll result into posts, fan-out and the page's poll status.
    pub async fn handle_poll<R: Rng + Send + ?Sized>(
        &self,
        page: &TrackedPage,
        result: Result<Vec<PolledPost>>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<PollStatus> {
        let polled = match result {
            Ok(polled) => polled,
            Err(e) => {
                let message = format!("{:#}", e);
                self.metrics.record_poll("error");
                self.events.emit_at(
                    EngineEvent::PollFailed {
                        tracked_page_id: page.id,
                        error: message.clone(),
                    },
                    now,
                );
                let status = PollStatus {
                    tracked_page_id: page.id,
                    last_polled_at: now,
                    status: "error".into(),
                    posts_found: 0,
                    new_posts: 0,
                    error: Some(message),
                };
                self.store.upsert_poll_status(&status).await?;
                return Ok(status);
            }
        };

        let mut new_posts = 0;
        for item in &polled {
            let hit = RawHit {
                platform: Some(page.platform),
                raw_url: item.url.clone(),
                external_id_hint: Some(item.external_post_id.clone()),
            };
            let resolved = match self.identity.resolve_for_page(&hit, page).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(page_id = %page.id, url = %item.url, error = %e, "Skipping unresolvable polled post");
                    continue;
                }
            };
            match self
                .offer(
                    &resolved,
                    page,
                    DiscoverySource::Poll,
                    item.content_text.clone(),
                    now,
                    now,
                    rng,
                )
                .await
            {
                Ok(Offer::Created(..)) => new_posts += 1,
                Ok(Offer::Duplicate) => {}
                Err(e) => {
                    error!(page_id = %page.id, error = %format!("{:#}", e), "Failed to record polled post");
                    self.events.emit_at(
                        EngineEvent::Warning {
                            context: "poll".into(),
                            message: format!("{:#}", e),
                        },
                        now,
                    );
                }
            }
        }

        self.metrics.record_poll("ok");
        let status = PollStatus {
            tracked_page_id: page.id,
            last_polled_at: now,
            status: "ok".into(),
            posts_found: polled.len() as i32,
            new_posts,
            error: None,
        };
        self.store.upsert_poll_status(&status).await?;
        if new_posts > 0 {
            info!(page_id = %page.id, found = polled.len(), new = new_posts, "Poll found new posts");
        }
        Ok(status)
    }

    /// Fetch and process one page. `None` when a poll of the page is
    /// already running.
    pub async fn poll_page<R: Rng + Send + ?Sized>(
        &self,
        page: &TrackedPage,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<PollStatus>> {
        if !lock(&self.in_flight).insert(page.id) {
            debug!(page_id = %page.id, "Poll already in flight");
            return Ok(None);
        }
        let timeout = StdDuration::from_secs(self.config.poll_timeout_secs.max(1));
        let fetched = match tokio::time::timeout(timeout, self.source.fetch_recent(page)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "poll timed out after {}s",
                timeout.as_secs()
            )),
        };
        let result = self.handle_poll(page, fetched, now, rng).await;
        lock(&self.in_flight).remove(&page.id);

        let interval = match self.plan_next_poll(page, now, rng).await {
            Ok(d) => d,
            Err(e) => {
                warn!(page_id = %page.id, error = %e, "Poll planning failed, using normal cadence");
                Duration::seconds(self.config.normal_interval_min_secs as i64)
            }
        };
        lock(&self.next_due).insert(page.id, now + interval);
        result.map(Some)
    }

    /// Whether any hunt-mode subscriber is inside the hunt window right now.
    pub async fn hunting_now(&self, page: &TrackedPage, now: DateTime<Utc>) -> Result<bool> {
        let (start, end) = self.config.hunt_window()?;
        for sub in self.subscriptions.engaged(page.id).await? {
            if sub.polling_mode != PollingMode::Hunt {
                continue;
            }
            let settings = self.store.user_settings(sub.user_id).await?;
            let local: NaiveTime = now.with_timezone(&user_offset(&settings)).time();
            if time_in_window(local, start, end) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn plan_next_poll<R: Rng + Send + ?Sized>(
        &self,
        page: &TrackedPage,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Duration> {
        let hunting = self.hunting_now(page, now).await?;
        let org = self.store.org_settings(page.org_id).await?;
        Ok(next_poll_interval(hunting, &org, &self.config, rng))
    }

    /// Active pages whose next poll is due. Pages never polled are due.
    pub async fn due_pages(&self, now: DateTime<Utc>) -> Result<Vec<TrackedPage>> {
        let pages = self.store.active_pages(None).await?;
        let due = lock(&self.next_due);
        let in_flight = lock(&self.in_flight);
        Ok(pages
            .into_iter()
            .filter(|p| !in_flight.contains(&p.id))
            .filter(|p| due.get(&p.id).is_none_or(|at| *at <= now))
            .collect())
    }

    // ── Realtime trigger ────────────────────────────────────────

    pub async fn handle_trigger<R: Rng + Send + ?Sized>(
        &self,
        trigger: &LinkTrigger,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<TriggerOutcome> {
        let outcome = self.resolve_trigger(trigger, now, rng).await?;
        self.metrics.record_trigger(outcome.as_str());
        info!(
            url = %trigger.url,
            source_label = trigger.source_label.as_deref().unwrap_or("-"),
            status = outcome.as_str(),
            "Link trigger handled"
        );
        Ok(outcome)
    }

    async fn resolve_trigger<R: Rng + Send + ?Sized>(
        &self,
        trigger: &LinkTrigger,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<TriggerOutcome> {
        if trigger.url.trim().is_empty() {
            return Ok(TriggerOutcome::Ignored {
                reason: "empty url".into(),
            });
        }
        let pages = self.store.active_pages(trigger.org_id).await?;
        let hit = RawHit {
            platform: None,
            raw_url: trigger.url.clone(),
            external_id_hint: None,
        };
        let resolved = match self.identity.resolve(&hit, &pages).await {
            Ok(r) => r,
            Err(EngineError::UnresolvedPage { url }) => {
                self.events.emit_at(
                    EngineEvent::UnmatchedLink {
                        url: url.clone(),
                        org_id: trigger.org_id,
                        source_label: trigger.source_label.clone(),
                    },
                    now,
                );
                if let Some(org_id) = trigger.org_id {
                    self.store
                        .append_audit(NewAuditEntry::suggestion(
                            org_id,
                            &url,
                            trigger.source_label.as_deref(),
                        ))
                        .await?;
                }
                return Ok(TriggerOutcome::Unmatched { url });
            }
            Err(e) => {
                return Ok(TriggerOutcome::Ignored {
                    reason: e.to_string(),
                })
            }
        };

        let Some(page) = pages.iter().find(|p| p.id == resolved.tracked_page_id) else {
            return Ok(TriggerOutcome::Unmatched {
                url: resolved.canonical_url,
            });
        };
        let first_seen = trigger.observed_at.map_or(now, |at| at.min(now));
        match self
            .offer(
                &resolved,
                page,
                DiscoverySource::Trigger,
                None,
                first_seen,
                now,
                rng,
            )
            .await?
        {
            Offer::Created(post, report) => Ok(TriggerOutcome::Matched {
                post_id: post.id,
                tracked_page_id: page.id,
                actions_created: report.created(),
            }),
            Offer::Duplicate => Ok(TriggerOutcome::Duplicate {
                tracked_page_id: page.id,
                external_post_id: resolved.external_post_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SessionStatus;
    use crate::config::SchedulerConfig;
    use crate::models::{PageType, Platform, Subscription, UserSettings};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct NoSource;

    #[async_trait]
    impl PostSource for NoSource {
        async fn fetch_recent(&self, _page: &TrackedPage) -> Result<Vec<PolledPost>> {
            Ok(vec![])
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, h, m, 0).unwrap()
    }

    fn page() -> TrackedPage {
        TrackedPage {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            platform: Platform::Linkedin,
            external_id: Some("acme".into()),
            url: "https://www.linkedin.com/company/acme".into(),
            name: "Acme".into(),
            page_type: PageType::CompanyPage,
            active: true,
            created_at: at(0, 0),
        }
    }

    fn subscriber(store: &MemoryStore, page: &TrackedPage, mode: PollingMode) -> Subscription {
        let s = Subscription {
            id: Uuid::new_v4(),
            tracked_page_id: page.id,
            user_id: Uuid::new_v4(),
            auto_like: true,
            auto_comment: true,
            polling_mode: mode,
            tags: vec![],
            created_at: at(0, 0),
        };
        store.insert_subscription(s.clone());
        s
    }

    fn discovery(store: Arc<MemoryStore>) -> Discovery {
        let metrics = Arc::new(Metrics::new());
        let sessions: Arc<dyn SessionStatus> = store.clone();
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            sessions,
            SchedulerConfig::default(),
            metrics.clone(),
        ));
        Discovery::new(
            store,
            IdentityResolver::new(),
            scheduler,
            Arc::new(NoSource),
            Arc::new(EventBus::new()),
            metrics,
            DiscoveryConfig::default(),
        )
    }

    fn polled(slug: &str) -> PolledPost {
        PolledPost {
            external_post_id: slug.into(),
            url: format!("https://www.linkedin.com/posts/acme_{}", slug),
            content_text: Some("hello".into()),
        }
    }

    #[test]
    fn interval_normal_respects_org_floor() {
        let mut rng = StdRng::seed_from_u64(1);
        let config = DiscoveryConfig::default();
        let mut org = OrgSettings::defaults(Uuid::new_v4());
        for _ in 0..50 {
            let d = next_poll_interval(false, &org, &config, &mut rng).num_seconds();
            assert!((300..=900).contains(&d));
        }
        org.polling_interval = Some(1800);
        assert_eq!(
            next_poll_interval(false, &org, &config, &mut rng).num_seconds(),
            1800
        );
        for _ in 0..50 {
            let d = next_poll_interval(true, &org, &config, &mut rng).num_seconds();
            assert!((30..=60).contains(&d));
        }
    }

    #[tokio::test]
    async fn poll_creates_posts_once_and_updates_status() {
        let store = Arc::new(MemoryStore::new());
        let p = page();
        store.insert_page(p.clone());
        subscriber(&store, &p, PollingMode::Normal);
        let d = discovery(store.clone());
        let mut rng = StdRng::seed_from_u64(2);

        let status = d
            .handle_poll(&p, Ok(vec![polled("a-1"), polled("b-2")]), at(12, 0), &mut rng)
            .await
            .unwrap();
        assert_eq!((status.posts_found, status.new_posts), (2, 2));
        assert_eq!(store.actions().len(), 4);

        let status = d
            .handle_poll(&p, Ok(vec![polled("a-1"), polled("b-2")]), at(12, 10), &mut rng)
            .await
            .unwrap();
        assert_eq!((status.posts_found, status.new_posts), (2, 0));
        assert_eq!(store.posts().len(), 2);
        assert_eq!(store.actions().len(), 4);
        assert_eq!(store.poll_status(p.id).await.unwrap().unwrap().last_polled_at, at(12, 10));
    }

    #[tokio::test]
    async fn poll_error_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let p = page();
        store.insert_page(p.clone());
        let d = discovery(store.clone());
        let mut rng = StdRng::seed_from_u64(3);
        let status = d
            .handle_poll(&p, Err(anyhow::anyhow!("sidecar down")), at(12, 0), &mut rng)
            .await
            .unwrap();
        assert_eq!(status.status, "error");
        assert_eq!(status.error.as_deref(), Some("sidecar down"));
    }

    #[tokio::test]
    async fn trigger_then_poll_is_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let p = page();
        store.insert_page(p.clone());
        subscriber(&store, &p, PollingMode::Normal);
        let d = discovery(store.clone());
        let mut rng = StdRng::seed_from_u64(4);

        let trigger = LinkTrigger {
            url: "https://www.linkedin.com/posts/acme_a-1?utm_source=share".into(),
            ..Default::default()
        };
        let outcome = d.handle_trigger(&trigger, at(12, 0), &mut rng).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Matched { actions_created: 2, .. }));
        // Triggers leave poll status alone.
        assert!(store.poll_status(p.id).await.unwrap().is_none());

        let again = d.handle_trigger(&trigger, at(12, 0), &mut rng).await.unwrap();
        assert_eq!(again.as_str(), "duplicate");

        let status = d
            .handle_poll(&p, Ok(vec![polled("a-1")]), at(12, 1), &mut rng)
            .await
            .unwrap();
        assert_eq!(status.new_posts, 0);
        assert_eq!(store.posts().len(), 1);
        assert_eq!(store.actions().len(), 2);
    }

    #[tokio::test]
    async fn trigger_unmatched_and_ignored() {
        let store = Arc::new(MemoryStore::new());
        let p = page();
        store.insert_page(p.clone());
        let d = discovery(store.clone());
        let mut rng = StdRng::seed_from_u64(5);

        let unmatched = LinkTrigger {
            url: "https://www.linkedin.com/posts/other_x-9".into(),
            org_id: Some(p.org_id),
            source_label: Some("slack".into()),
            ..Default::default()
        };
        let outcome = d.handle_trigger(&unmatched, at(12, 0), &mut rng).await.unwrap();
        assert_eq!(outcome.as_str(), "unmatched");
        assert_eq!(d.events.suggestions(Some(p.org_id)).len(), 1);
        assert_eq!(store.audit_entries()[0].action, "discovery_unmatched");

        let ignored = LinkTrigger {
            url: "https://example.com/blog".into(),
            ..Default::default()
        };
        let outcome = d.handle_trigger(&ignored, at(12, 0), &mut rng).await.unwrap();
        assert_eq!(outcome.as_str(), "ignored");
    }

    #[tokio::test]
    async fn hunting_only_inside_local_window() {
        let store = Arc::new(MemoryStore::new());
        let p = page();
        store.insert_page(p.clone());
        let s = subscriber(&store, &p, PollingMode::Hunt);
        let d = discovery(store.clone());
        assert!(d.hunting_now(&p, at(8, 0)).await.unwrap());
        assert!(!d.hunting_now(&p, at(11, 0)).await.unwrap());

        // UTC+5: 04:00 UTC is 09:00 local.
        store
            .save_user_settings(&UserSettings {
                utc_offset_minutes: 300,
                ..UserSettings::defaults(s.user_id)
            })
            .await
            .unwrap();
        assert!(d.hunting_now(&p, at(4, 0)).await.unwrap());
        assert!(!d.hunting_now(&p, at(8, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn due_pages_tracks_next_poll() {
        let store = Arc::new(MemoryStore::new());
        let p = page();
        store.insert_page(p.clone());
        let d = discovery(store.clone());
        let mut rng = StdRng::seed_from_u64(6);
        assert_eq!(d.due_pages(at(12, 0)).await.unwrap().len(), 1);
        d.poll_page(&p, at(12, 0), &mut rng).await.unwrap();
        assert!(d.due_pages(at(12, 1)).await.unwrap().is_empty());
        assert_eq!(d.due_pages(at(12, 16)).await.unwrap().len(), 1);
    }
}
