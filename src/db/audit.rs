//! Audit trail, poll status projection and analytics samples.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use super::Database;
use crate::analytics::ReactionSample;
use crate::audit::{AuditFilter, NewAuditEntry};
use crate::models::{AuditLogEntry, PollStatus};

const AUDIT_COLUMNS: &str =
    "id, org_id, user_id, action, target_type, target_id, metadata, created_at";

impl Database {
    pub async fn append_audit(&self, entry: &NewAuditEntry) -> Result<AuditLogEntry> {
        let row = sqlx::query_as::<_, AuditLogEntry>(&format!(
            "INSERT INTO audit_log (org_id, user_id, action, target_type, target_id, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {AUDIT_COLUMNS}"
        ))
        .bind(entry.org_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(Json(&entry.metadata))
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditLogEntry>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log
             WHERE ($1::uuid IS NULL OR org_id = $1)
               AND ($2::uuid IS NULL OR user_id = $2)
               AND ($3::text IS NULL OR action = $3)
               AND ($4::timestamptz IS NULL OR created_at >= $4)
               AND ($5::timestamptz IS NULL OR created_at <= $5)
             ORDER BY created_at DESC, id
             LIMIT $6"
        ))
        .bind(filter.org_id)
        .bind(filter.user_id)
        .bind(&filter.action)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_poll_status(&self, status: &PollStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO poll_status (tracked_page_id, last_polled_at, status, posts_found, new_posts, error)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (tracked_page_id) DO UPDATE SET
               last_polled_at = EXCLUDED.last_polled_at, status = EXCLUDED.status,
               posts_found = EXCLUDED.posts_found, new_posts = EXCLUDED.new_posts,
               error = EXCLUDED.error",
        )
        .bind(status.tracked_page_id)
        .bind(status.last_polled_at)
        .bind(&status.status)
        .bind(status.posts_found)
        .bind(status.new_posts)
        .bind(&status.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn poll_status(&self, tracked_page_id: Uuid) -> Result<Option<PollStatus>> {
        let row = sqlx::query_as::<_, PollStatus>(
            "SELECT tracked_page_id, last_polled_at, status, posts_found, new_posts, error
             FROM poll_status WHERE tracked_page_id = $1",
        )
        .bind(tracked_page_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn reaction_samples(
        &self,
        org_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReactionSample>> {
        let rows = sqlx::query_as::<_, ReactionSample>(
            "SELECT a.action_type, a.status, p.first_seen_at, a.completed_at
             FROM engagement_actions a
             JOIN posts p ON p.id = a.post_id
             WHERE a.org_id = $1
               AND ($2::timestamptz IS NULL OR p.first_seen_at >= $2)
               AND ($3::timestamptz IS NULL OR p.first_seen_at <= $3)",
        )
        .bind(org_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
