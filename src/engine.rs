//! # Engine — Wiring and Background Loops
//!
//! Builds the component graph over one [`Store`] and a set of collaborators,
//! and runs three independent loops:
//!
//! | Loop | Cadence | Work |
//! |------|---------|------|
//! | polling | `discovery.tick_secs` | poll every due page, each in its own task |
//! | dispatch | `dispatch.tick_secs` | claim due actions, route to account workers |
//! | maintenance | 60 s | day roll / recovery / blocked recheck, stale sweep |
//!
//! Loops log failures and keep going; nothing in a tick is fatal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::{ActionSink, PostSource, SessionStatus};
use crate::comments::{CommentDrafter, CommentPipeline};
use crate::config::EngineConfig;
use crate::discovery::{Discovery, LinkTrigger, TriggerOutcome};
use crate::dispatch::{DispatchContext, Dispatcher};
use crate::events::EventBus;
use crate::identity::{IdentityResolver, LinkExpander};
use crate::models::{PollStatus, TrackedPage};
use crate::prom_metrics::Metrics;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::subscriptions::SubscriptionResolver;
use crate::throttle::ThrottleController;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// External capabilities the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn PostSource>,
    pub sink: Arc<dyn ActionSink>,
    pub sessions: Arc<dyn SessionStatus>,
    pub drafter: Arc<dyn CommentDrafter>,
    pub expander: Option<Arc<dyn LinkExpander>>,
}

pub struct Engine {
    pub store: Arc<dyn Store>,
    pub discovery: Arc<Discovery>,
    pub dispatcher: Arc<Dispatcher>,
    pub events: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
    pub config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, collaborators: Collaborators, config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new());
        let metrics = Arc::new(Metrics::new());

        let mut identity = IdentityResolver::new();
        if let Some(expander) = collaborators.expander.clone() {
            identity = identity.with_expander(expander);
        }
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            collaborators.sessions.clone(),
            config.scheduler.clone(),
            metrics.clone(),
        ));
        let discovery = Arc::new(Discovery::new(
            store.clone(),
            identity,
            scheduler,
            collaborators.source.clone(),
            events.clone(),
            metrics.clone(),
            config.discovery.clone(),
        ));
        let throttle = Arc::new(ThrottleController::new(
            config.throttle.clone(),
            SubscriptionResolver::new(store.clone()),
            collaborators.sessions.clone(),
        ));
        let comments = Arc::new(CommentPipeline::new(
            collaborators.drafter.clone(),
            store.clone(),
            &config.comments,
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(DispatchContext {
            store: store.clone(),
            sink: collaborators.sink.clone(),
            comments,
            throttle,
            events: events.clone(),
            metrics: metrics.clone(),
            config: config.dispatch.clone(),
        })));

        Engine {
            store,
            discovery,
            dispatcher,
            events,
            metrics,
            config,
        }
    }

    /// Handle one realtime link trigger.
    pub async fn trigger(&self, trigger: &LinkTrigger) -> Result<TriggerOutcome> {
        let mut rng = StdRng::from_entropy();
        self.discovery
            .handle_trigger(trigger, Utc::now(), &mut rng)
            .await
    }

    /// Poll every active page once, sequentially, ignoring cadence.
    pub async fn poll_once(&self) -> Result<Vec<(TrackedPage, Option<PollStatus>)>> {
        let mut rng = StdRng::from_entropy();
        let pages = self.store.active_pages(None).await?;
        let mut results = Vec::with_capacity(pages.len());
        for page in pages {
            let status = self.discovery.poll_page(&page, Utc::now(), &mut rng).await?;
            results.push((page, status));
        }
        Ok(results)
    }

    /// Start one poll task per due page; returns how many were started.
    pub async fn poll_tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let pages = self.discovery.due_pages(now).await?;
        let n = pages.len();
        for page in pages {
            let discovery = self.discovery.clone();
            tokio::spawn(async move {
                let mut rng = StdRng::from_entropy();
                if let Err(e) = discovery.poll_page(&page, Utc::now(), &mut rng).await {
                    error!(page_id = %page.id, error = %format!("{:#}", e), "Poll cycle failed");
                }
            });
        }
        if n > 0 {
            debug!(pages = n, "Started polls");
        }
        Ok(n)
    }

    pub async fn maintenance_tick(&self, now: DateTime<Utc>) -> Result<()> {
        self.dispatcher.maintain_accounts().await?;
        self.dispatcher.sweep_stale(now).await?;
        Ok(())
    }

    /// Spawn the polling, dispatch and maintenance loops.
    pub fn spawn_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let poll_engine = Arc::clone(self);
        let poll_every = Duration::from_secs(self.config.discovery.tick_secs.max(1));
        let polling = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_every);
            loop {
                interval.tick().await;
                if let Err(e) = poll_engine.poll_tick(Utc::now()).await {
                    error!(error = %format!("{:#}", e), "Polling tick failed");
                }
            }
        });

        let dispatch_engine = Arc::clone(self);
        let dispatch_every = Duration::from_secs(self.config.dispatch.tick_secs.max(1));
        let dispatch = tokio::spawn(async move {
            let mut interval = tokio::time::interval(dispatch_every);
            loop {
                interval.tick().await;
                if let Err(e) = dispatch_engine.dispatcher.dispatch_due(Utc::now()).await {
                    error!(error = %format!("{:#}", e), "Dispatch tick failed");
                }
            }
        });

        let maintenance_engine = Arc::clone(self);
        let maintenance = tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = maintenance_engine.maintenance_tick(Utc::now()).await {
                    warn!(error = %format!("{:#}", e), "Maintenance tick failed");
                }
            }
        });

        info!(
            poll_tick_secs = poll_every.as_secs(),
            dispatch_tick_secs = dispatch_every.as_secs(),
            "Engine loops started"
        );
        vec![polling, dispatch, maintenance]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{PolledPost, SinkRequest, SinkResult};
    use crate::comments::DraftRequest;
    use crate::models::{
        ActionStatus, ActionType, PageType, Platform, PollingMode, Subscription, UserSettings,
    };
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct OnePost;

    #[async_trait]
    impl PostSource for OnePost {
        async fn fetch_recent(&self, _page: &TrackedPage) -> Result<Vec<PolledPost>> {
            Ok(vec![PolledPost {
                external_post_id: "urn:li:activity:7".into(),
                url: "https://www.linkedin.com/feed/update/urn:li:activity:7".into(),
                content_text: Some("Launch day".into()),
            }])
        }
    }

    struct OkSink;

    #[async_trait]
    impl ActionSink for OkSink {
        async fn execute(&self, _request: &SinkRequest) -> Result<SinkResult> {
            Ok(SinkResult::completed())
        }
    }

    struct Drafter;

    #[async_trait]
    impl CommentDrafter for Drafter {
        async fn draft(&self, _request: &DraftRequest) -> Result<Vec<String>> {
            Ok(vec!["Congrats on the launch, what was the hardest part?".into()])
        }
    }

    #[tokio::test]
    async fn poll_once_fans_out_and_likes_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let page = TrackedPage {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            platform: Platform::Linkedin,
            external_id: Some("acme".into()),
            url: "https://www.linkedin.com/company/acme".into(),
            name: "Acme".into(),
            page_type: PageType::CompanyPage,
            active: true,
            created_at: Utc::now(),
        };
        store.insert_page(page.clone());
        let user = Uuid::new_v4();
        store.insert_subscription(Subscription {
            id: Uuid::new_v4(),
            tracked_page_id: page.id,
            user_id: user,
            auto_like: true,
            auto_comment: true,
            polling_mode: PollingMode::Normal,
            tags: vec![],
            created_at: Utc::now(),
        });
        store
            .save_user_settings(&UserSettings {
                quiet_hours_enabled: false,
                ..UserSettings::defaults(user)
            })
            .await
            .unwrap();

        let engine = Engine::new(
            store.clone(),
            Collaborators {
                source: Arc::new(OnePost),
                sink: Arc::new(OkSink),
                sessions: store.clone(),
                drafter: Arc::new(Drafter),
                expander: None,
            },
            EngineConfig::default(),
        );

        let polled = engine.poll_once().await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].1.as_ref().unwrap().new_posts, 1);
        assert_eq!(store.actions().len(), 2);

        // A second poll sees the same post and creates nothing.
        let polled = engine.poll_once().await.unwrap();
        assert_eq!(polled[0].1.as_ref().unwrap().new_posts, 0);
        assert_eq!(store.actions().len(), 2);

        engine
            .dispatcher
            .dispatch_due_inline(Utc::now())
            .await
            .unwrap();
        let like = store
            .actions()
            .into_iter()
            .find(|a| a.action_type == ActionType::Like)
            .unwrap();
        assert_eq!(like.status, ActionStatus::Completed);
    }
}
