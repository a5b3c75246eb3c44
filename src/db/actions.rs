//! Engagement action lifecycle.
//!
//! Status changes are single conditional `UPDATE`s so two processes racing on
//! the same row cannot both win: claiming uses `FOR UPDATE SKIP LOCKED`,
//! dispatching requires `status = 'scheduled'`, and no transition touches a
//! terminal row.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Database;
use crate::models::{ActionStatus, ActionTransition, EngagementAction, NewAction};
use crate::store::ActionFilter;

const ACTION_COLUMNS: &str = "id, post_id, user_id, org_id, tracked_page_id, platform, action_type, status,
     scheduled_at, attempted_at, completed_at, error_message, comment_text, attempts,
     created_at, updated_at";

impl Database {
    /// Insert a pending action unless a live one exists for the same
    /// `(post_id, user_id, action_type)`.
    pub async fn create_action(&self, action: &NewAction) -> Result<Option<EngagementAction>> {
        let row = sqlx::query_as::<_, EngagementAction>(&format!(
            "INSERT INTO engagement_actions
               (post_id, user_id, org_id, tracked_page_id, platform, action_type, status, scheduled_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
             ON CONFLICT (post_id, user_id, action_type)
               WHERE status IN ('pending', 'scheduled', 'dispatched')
             DO NOTHING
             RETURNING {ACTION_COLUMNS}"
        ))
        .bind(action.post_id)
        .bind(action.user_id)
        .bind(action.org_id)
        .bind(action.tracked_page_id)
        .bind(action.platform.as_str())
        .bind(action.action_type.as_str())
        .bind(action.scheduled_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_action(&self, id: Uuid) -> Result<Option<EngagementAction>> {
        let row = sqlx::query_as::<_, EngagementAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM engagement_actions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Move up to `limit` due pending actions to `scheduled`, oldest first.
    pub async fn claim_due_actions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EngagementAction>> {
        let mut rows = sqlx::query_as::<_, EngagementAction>(&format!(
            "UPDATE engagement_actions SET status = 'scheduled', updated_at = $1
             WHERE id IN (
               SELECT id FROM engagement_actions
               WHERE status = 'pending' AND scheduled_at <= $1
               ORDER BY scheduled_at, created_at
               LIMIT $2
               FOR UPDATE SKIP LOCKED
             )
             RETURNING {ACTION_COLUMNS}"
        ))
        .bind(now)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        // RETURNING order is unspecified.
        rows.sort_by_key(|a| (a.scheduled_at, a.created_at));
        Ok(rows)
    }

    pub async fn mark_dispatched(
        &self,
        id: Uuid,
        attempted_at: DateTime<Utc>,
    ) -> Result<Option<EngagementAction>> {
        let row = sqlx::query_as::<_, EngagementAction>(&format!(
            "UPDATE engagement_actions
             SET status = 'dispatched', attempted_at = $2, attempts = attempts + 1, updated_at = $2
             WHERE id = $1 AND status = 'scheduled'
             RETURNING {ACTION_COLUMNS}"
        ))
        .bind(id)
        .bind(attempted_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn transition_action(
        &self,
        id: Uuid,
        transition: &ActionTransition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let live = "status IN ('pending', 'scheduled', 'dispatched')";
        let result = match transition {
            ActionTransition::Requeue {
                scheduled_at,
                error_message,
                refund_attempt,
            } => {
                sqlx::query(&format!(
                    "UPDATE engagement_actions
                     SET status = 'pending', scheduled_at = $2, error_message = $3,
                         attempts = CASE WHEN $4 THEN GREATEST(attempts - 1, 0) ELSE attempts END,
                         updated_at = $5
                     WHERE id = $1 AND {live}"
                ))
                .bind(id)
                .bind(scheduled_at)
                .bind(error_message)
                .bind(refund_attempt)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
            ActionTransition::Complete {
                completed_at,
                comment_text,
            } => {
                sqlx::query(&format!(
                    "UPDATE engagement_actions
                     SET status = 'completed', completed_at = $2, comment_text = $3,
                         error_message = NULL, updated_at = $4
                     WHERE id = $1 AND {live}"
                ))
                .bind(id)
                .bind(completed_at)
                .bind(comment_text)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
            ActionTransition::Fail { error_message } => {
                sqlx::query(&format!(
                    "UPDATE engagement_actions
                     SET status = 'failed', error_message = $2, updated_at = $3
                     WHERE id = $1 AND {live}"
                ))
                .bind(id)
                .bind(error_message)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
        };
        if result.rows_affected() == 0 {
            return Err(anyhow!("action {} not found or already terminal", id));
        }
        Ok(())
    }

    pub async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<EngagementAction>> {
        let rows = sqlx::query_as::<_, EngagementAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM engagement_actions
             WHERE ($1::uuid IS NULL OR org_id = $1)
               AND ($2::uuid IS NULL OR user_id = $2)
               AND ($3::uuid IS NULL OR tracked_page_id = $3)
               AND ($4::text IS NULL OR status = $4)
               AND ($5::text IS NULL OR action_type = $5)
               AND ($6::timestamptz IS NULL OR scheduled_at >= $6)
               AND ($7::timestamptz IS NULL OR scheduled_at <= $7)
             ORDER BY scheduled_at DESC
             LIMIT $8"
        ))
        .bind(filter.org_id)
        .bind(filter.user_id)
        .bind(filter.tracked_page_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.action_type.map(|t| t.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn stale_actions(
        &self,
        status: ActionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EngagementAction>> {
        let column = match status {
            ActionStatus::Dispatched => "attempted_at",
            _ => "updated_at",
        };
        let rows = sqlx::query_as::<_, EngagementAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM engagement_actions
             WHERE status = $1 AND {column} < $2
             ORDER BY {column}"
        ))
        .bind(status.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
