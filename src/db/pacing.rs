//! Per-account pacing rows. Only the account's dispatch worker writes them.

use anyhow::Result;

use super::Database;
use crate::models::{AccountKey, PacingState};

const PACING_COLUMNS: &str = "user_id, platform, risk_profile, state, consecutive_failures,
     last_failure_at, throttled_until, daily_like_count, daily_comment_count,
     day_window_start, last_action_at";

impl Database {
    pub async fn load_pacing(&self, key: AccountKey) -> Result<Option<PacingState>> {
        let row = sqlx::query_as::<_, PacingState>(&format!(
            "SELECT {PACING_COLUMNS} FROM pacing_states WHERE user_id = $1 AND platform = $2"
        ))
        .bind(key.user_id)
        .bind(key.platform.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn save_pacing(&self, state: &PacingState) -> Result<()> {
        sqlx::query(
            "INSERT INTO pacing_states (user_id, platform, risk_profile, state, consecutive_failures,
                                        last_failure_at, throttled_until, daily_like_count,
                                        daily_comment_count, day_window_start, last_action_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (user_id, platform) DO UPDATE SET
               risk_profile = EXCLUDED.risk_profile, state = EXCLUDED.state,
               consecutive_failures = EXCLUDED.consecutive_failures,
               last_failure_at = EXCLUDED.last_failure_at,
               throttled_until = EXCLUDED.throttled_until,
               daily_like_count = EXCLUDED.daily_like_count,
               daily_comment_count = EXCLUDED.daily_comment_count,
               day_window_start = EXCLUDED.day_window_start,
               last_action_at = EXCLUDED.last_action_at",
        )
        .bind(state.user_id)
        .bind(state.platform.as_str())
        .bind(state.risk_profile.as_str())
        .bind(state.state.as_str())
        .bind(state.consecutive_failures)
        .bind(state.last_failure_at)
        .bind(state.throttled_until)
        .bind(state.daily_like_count)
        .bind(state.daily_comment_count)
        .bind(state.day_window_start)
        .bind(state.last_action_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_pacing(&self) -> Result<Vec<PacingState>> {
        let rows = sqlx::query_as::<_, PacingState>(&format!(
            "SELECT {PACING_COLUMNS} FROM pacing_states ORDER BY user_id, platform"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
