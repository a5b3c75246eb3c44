//! Settings, voice profiles and avoid phrases.
//!
//! Missing rows read as defaults, so a user or org that never saved settings
//! behaves exactly like one that saved the defaults.

use anyhow::Result;
use sqlx::types::Json;
use uuid::Uuid;

use super::Database;
use crate::models::{AvoidPhrase, OrgSettings, ToneSettings, UserSettings, VoiceProfile};

impl Database {
    pub async fn user_settings(&self, user_id: Uuid) -> Result<UserSettings> {
        let row = sqlx::query_as::<_, UserSettings>(
            "SELECT user_id, risk_profile, quiet_hours_enabled, quiet_hours_start,
                    quiet_hours_end, polling_interval, utc_offset_minutes
             FROM user_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_else(|| UserSettings::defaults(user_id)))
    }

    pub async fn save_user_settings(&self, settings: &UserSettings) -> Result<()> {
        let s = settings.clone().clamp();
        sqlx::query(
            "INSERT INTO user_settings (user_id, risk_profile, quiet_hours_enabled, quiet_hours_start,
                                        quiet_hours_end, polling_interval, utc_offset_minutes)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id) DO UPDATE SET
               risk_profile = EXCLUDED.risk_profile,
               quiet_hours_enabled = EXCLUDED.quiet_hours_enabled,
               quiet_hours_start = EXCLUDED.quiet_hours_start,
               quiet_hours_end = EXCLUDED.quiet_hours_end,
               polling_interval = EXCLUDED.polling_interval,
               utc_offset_minutes = EXCLUDED.utc_offset_minutes",
        )
        .bind(s.user_id)
        .bind(s.risk_profile.as_str())
        .bind(s.quiet_hours_enabled)
        .bind(s.quiet_hours_start)
        .bind(s.quiet_hours_end)
        .bind(s.polling_interval)
        .bind(s.utc_offset_minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn org_settings(&self, org_id: Uuid) -> Result<OrgSettings> {
        let row = sqlx::query_as::<_, OrgSettings>(
            "SELECT org_id, quiet_hours_enabled, comment_window_min_secs,
                    comment_window_max_secs, polling_interval
             FROM org_settings WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_else(|| OrgSettings::defaults(org_id)))
    }

    pub async fn save_org_settings(&self, settings: &OrgSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO org_settings (org_id, quiet_hours_enabled, comment_window_min_secs,
                                       comment_window_max_secs, polling_interval)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (org_id) DO UPDATE SET
               quiet_hours_enabled = EXCLUDED.quiet_hours_enabled,
               comment_window_min_secs = EXCLUDED.comment_window_min_secs,
               comment_window_max_secs = EXCLUDED.comment_window_max_secs,
               polling_interval = EXCLUDED.polling_interval",
        )
        .bind(settings.org_id)
        .bind(settings.quiet_hours_enabled)
        .bind(settings.comment_window_min_secs)
        .bind(settings.comment_window_max_secs)
        .bind(settings.polling_interval)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn voice_profile(&self, user_id: Uuid) -> Result<VoiceProfile> {
        let row: Option<(String, Json<ToneSettings>)> =
            sqlx::query_as("SELECT profile_text, tone FROM voice_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((profile_text, Json(tone))) => VoiceProfile {
                user_id,
                profile_text,
                tone,
            },
            None => VoiceProfile {
                user_id,
                ..Default::default()
            },
        })
    }

    pub async fn save_voice_profile(&self, profile: &VoiceProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO voice_profiles (user_id, profile_text, tone) VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE SET
               profile_text = EXCLUDED.profile_text, tone = EXCLUDED.tone",
        )
        .bind(profile.user_id)
        .bind(&profile.profile_text)
        .bind(Json(&profile.tone))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active global rules plus the organization's own.
    pub async fn avoid_phrases(&self, org_id: Uuid) -> Result<Vec<AvoidPhrase>> {
        let rows = sqlx::query_as::<_, AvoidPhrase>(
            "SELECT id, org_id, phrase, active FROM avoid_phrases
             WHERE active AND (org_id IS NULL OR org_id = $1)
             ORDER BY org_id NULLS FIRST, phrase",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn add_avoid_phrase(&self, org_id: Option<Uuid>, phrase: &str) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO avoid_phrases (org_id, phrase) VALUES ($1, $2) RETURNING id",
        )
        .bind(org_id)
        .bind(phrase)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}
