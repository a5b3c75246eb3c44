//! Tracked pages and subscriptions.
//!
//! Both tables are managed by the surrounding product; the engine only reads
//! them. The insert helpers exist for seeding and integration tests.

use anyhow::Result;
use uuid::Uuid;

use super::Database;
use crate::models::{Subscription, TrackedPage};

const PAGE_COLUMNS: &str =
    "id, org_id, platform, external_id, url, name, page_type, active, created_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, tracked_page_id, user_id, auto_like, auto_comment, polling_mode, tags, created_at";

impl Database {
    pub async fn active_pages(&self, org_id: Option<Uuid>) -> Result<Vec<TrackedPage>> {
        let pages = sqlx::query_as::<_, TrackedPage>(&format!(
            "SELECT {PAGE_COLUMNS} FROM tracked_pages
             WHERE active AND ($1::uuid IS NULL OR org_id = $1)
             ORDER BY created_at, id"
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    pub async fn get_page(&self, id: Uuid) -> Result<Option<TrackedPage>> {
        let page = sqlx::query_as::<_, TrackedPage>(&format!(
            "SELECT {PAGE_COLUMNS} FROM tracked_pages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(page)
    }

    pub async fn insert_page(&self, page: &TrackedPage) -> Result<()> {
        sqlx::query(
            "INSERT INTO tracked_pages (id, org_id, platform, external_id, url, name, page_type, active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(page.id)
        .bind(page.org_id)
        .bind(page.platform.as_str())
        .bind(&page.external_id)
        .bind(&page.url)
        .bind(&page.name)
        .bind(page.page_type.as_str())
        .bind(page.active)
        .bind(page.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_page_active(&self, id: Uuid, active: bool) -> Result<()> {
        sqlx::query("UPDATE tracked_pages SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_subscriptions(&self, tracked_page_id: Uuid) -> Result<Vec<Subscription>> {
        let subs = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE tracked_page_id = $1
             ORDER BY created_at, id"
        ))
        .bind(tracked_page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    pub async fn get_subscription(
        &self,
        tracked_page_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE tracked_page_id = $1 AND user_id = $2"
        ))
        .bind(tracked_page_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    /// Insert or replace the subscription for `(tracked_page_id, user_id)`.
    pub async fn upsert_subscription(&self, sub: &Subscription) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions (id, tracked_page_id, user_id, auto_like, auto_comment, polling_mode, tags, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (tracked_page_id, user_id) DO UPDATE SET
               auto_like = EXCLUDED.auto_like, auto_comment = EXCLUDED.auto_comment,
               polling_mode = EXCLUDED.polling_mode, tags = EXCLUDED.tags",
        )
        .bind(sub.id)
        .bind(sub.tracked_page_id)
        .bind(sub.user_id)
        .bind(sub.auto_like)
        .bind(sub.auto_comment)
        .bind(sub.polling_mode.as_str())
        .bind(&sub.tags)
        .bind(sub.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
