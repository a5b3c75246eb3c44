//! Subscription resolution: who engages with a page, in what order.
//!
//! The creation-time ordering returned here is the base order for comment
//! staggering, so it must be stable across calls.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::models::{ActionType, PollingMode, Subscription};
use crate::store::Store;

#[derive(Clone)]
pub struct SubscriptionResolver {
    store: Arc<dyn Store>,
}

impl SubscriptionResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        SubscriptionResolver { store }
    }

    /// Subscriptions for a page ordered by creation time, ties by id.
    pub async fn list_subscriptions(&self, tracked_page_id: Uuid) -> Result<Vec<Subscription>> {
        let mut subs = self.store.list_subscriptions(tracked_page_id).await?;
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(subs)
    }

    /// Subscriptions with at least one of like/comment enabled.
    pub async fn engaged(&self, tracked_page_id: Uuid) -> Result<Vec<Subscription>> {
        Ok(self
            .list_subscriptions(tracked_page_id)
            .await?
            .into_iter()
            .filter(|s| s.auto_like || s.auto_comment)
            .collect())
    }

    /// Whether an action of this type is still wanted: the page is active and
    /// the user's subscription still enables the type.
    pub async fn still_wanted(
        &self,
        tracked_page_id: Uuid,
        user_id: Uuid,
        action_type: ActionType,
    ) -> Result<bool> {
        let Some(page) = self.store.get_page(tracked_page_id).await? else {
            return Ok(false);
        };
        if !page.active {
            return Ok(false);
        }
        Ok(self
            .store
            .get_subscription(tracked_page_id, user_id)
            .await?
            .is_some_and(|s| s.wants(action_type)))
    }

    /// A page is hunted when any engaged subscription is in hunt mode.
    pub async fn is_hunted(&self, tracked_page_id: Uuid) -> Result<bool> {
        Ok(self
            .engaged(tracked_page_id)
            .await?
            .iter()
            .any(|s| s.polling_mode == PollingMode::Hunt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageType, Platform, TrackedPage};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn page(active: bool) -> TrackedPage {
        TrackedPage {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            platform: Platform::Linkedin,
            external_id: Some("acme".into()),
            url: "https://www.linkedin.com/company/acme".into(),
            name: "Acme".into(),
            page_type: PageType::CompanyPage,
            active,
            created_at: Utc::now(),
        }
    }

    fn sub(page_id: Uuid, offset_secs: i64, like: bool, comment: bool) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            tracked_page_id: page_id,
            user_id: Uuid::new_v4(),
            auto_like: like,
            auto_comment: comment,
            polling_mode: PollingMode::Normal,
            tags: vec![],
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn ordered_by_creation_time() {
        let store = Arc::new(MemoryStore::new());
        let p = page(true);
        store.insert_page(p.clone());
        let late = sub(p.id, 30, true, true);
        let early = sub(p.id, 10, true, false);
        store.insert_subscription(late.clone());
        store.insert_subscription(early.clone());

        let resolver = SubscriptionResolver::new(store);
        let subs = resolver.list_subscriptions(p.id).await.unwrap();
        assert_eq!(subs[0].id, early.id);
        assert_eq!(subs[1].id, late.id);
    }

    #[tokio::test]
    async fn engaged_drops_fully_disabled_subscriptions() {
        let store = Arc::new(MemoryStore::new());
        let p = page(true);
        store.insert_page(p.clone());
        store.insert_subscription(sub(p.id, 0, false, false));
        store.insert_subscription(sub(p.id, 1, false, true));
        let resolver = SubscriptionResolver::new(store);
        assert_eq!(resolver.engaged(p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn still_wanted_tracks_page_and_flags() {
        let store = Arc::new(MemoryStore::new());
        let p = page(true);
        store.insert_page(p.clone());
        let s = sub(p.id, 0, true, true);
        store.insert_subscription(s.clone());
        let resolver = SubscriptionResolver::new(store.clone());

        assert!(resolver.still_wanted(p.id, s.user_id, ActionType::Comment).await.unwrap());
        store.set_subscription_flags(p.id, s.user_id, true, false);
        assert!(!resolver.still_wanted(p.id, s.user_id, ActionType::Comment).await.unwrap());
        assert!(resolver.still_wanted(p.id, s.user_id, ActionType::Like).await.unwrap());
        store.set_page_active(p.id, false);
        assert!(!resolver.still_wanted(p.id, s.user_id, ActionType::Like).await.unwrap());
        assert!(!resolver.still_wanted(p.id, Uuid::new_v4(), ActionType::Like).await.unwrap());
    }

    #[tokio::test]
    async fn hunt_mode_detected() {
        let store = Arc::new(MemoryStore::new());
        let p = page(true);
        store.insert_page(p.clone());
        let mut s = sub(p.id, 0, true, false);
        store.insert_subscription(s.clone());
        let resolver = SubscriptionResolver::new(store.clone());
        assert!(!resolver.is_hunted(p.id).await.unwrap());

        s.id = Uuid::new_v4();
        s.user_id = Uuid::new_v4();
        s.polling_mode = PollingMode::Hunt;
        store.insert_subscription(s);
        assert!(resolver.is_hunted(p.id).await.unwrap());
    }
}
