//! # Analytics — Engagement Summary Read Model
//!
//! Aggregates per-action samples into the summary the UI renders: counts by
//! type and status, completed actions per day, and reaction time (post
//! `first_seen_at` → action `completed_at`) statistics overall and per type.
//! Both store backends feed the same [`AnalyticsSummary::from_samples`], so the
//! numbers never depend on which backend served them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ActionStatus, ActionType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReactionSample {
    #[sqlx(try_from = "String")]
    pub action_type: ActionType,
    #[sqlx(try_from = "String")]
    pub status: ActionStatus,
    pub first_seen_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub scheduled: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    fn bump(&mut self, status: ActionStatus) {
        match status {
            ActionStatus::Pending => self.pending += 1,
            ActionStatus::Scheduled => self.scheduled += 1,
            ActionStatus::Dispatched => self.dispatched += 1,
            ActionStatus::Completed => self.completed += 1,
            ActionStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.scheduled + self.dispatched + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReactionStats {
    pub count: u64,
    pub avg_secs: Option<f64>,
    pub median_secs: Option<f64>,
    pub min_secs: Option<i64>,
    pub max_secs: Option<i64>,
}

impl ReactionStats {
    fn from_secs(mut secs: Vec<i64>) -> Self {
        if secs.is_empty() {
            return ReactionStats::default();
        }
        secs.sort_unstable();
        let n = secs.len();
        let sum: i64 = secs.iter().sum();
        let median = if n % 2 == 1 {
            secs[n / 2] as f64
        } else {
            (secs[n / 2 - 1] + secs[n / 2]) as f64 / 2.0
        };
        ReactionStats {
            count: n as u64,
            avg_secs: Some(sum as f64 / n as f64),
            median_secs: Some(median),
            min_secs: secs.first().copied(),
            max_secs: secs.last().copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCompleted {
    pub date: NaiveDate,
    pub likes: u64,
    pub comments: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub likes: StatusCounts,
    pub comments: StatusCounts,
    pub reaction_time: ReactionStats,
    pub like_reaction_time: ReactionStats,
    pub comment_reaction_time: ReactionStats,
    pub daily_completed: Vec<DailyCompleted>,
}

impl AnalyticsSummary {
    pub fn from_samples(samples: &[ReactionSample]) -> Self {
        let mut summary = AnalyticsSummary::default();
        let mut all = Vec::new();
        let mut likes = Vec::new();
        let mut comments = Vec::new();
        let mut daily: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();

        for s in samples {
            match s.action_type {
                ActionType::Like => summary.likes.bump(s.status),
                ActionType::Comment => summary.comments.bump(s.status),
            }
            if s.status != ActionStatus::Completed {
                continue;
            }
            let Some(done) = s.completed_at else { continue };
            // Clock skew between collaborators can produce negative gaps.
            let secs = (done - s.first_seen_at).num_seconds().max(0);
            all.push(secs);
            let day = daily.entry(done.date_naive()).or_default();
            match s.action_type {
                ActionType::Like => {
                    likes.push(secs);
                    day.0 += 1;
                }
                ActionType::Comment => {
                    comments.push(secs);
                    day.1 += 1;
                }
            }
        }

        summary.reaction_time = ReactionStats::from_secs(all);
        summary.like_reaction_time = ReactionStats::from_secs(likes);
        summary.comment_reaction_time = ReactionStats::from_secs(comments);
        summary.daily_completed = daily
            .into_iter()
            .map(|(date, (likes, comments))| DailyCompleted {
                date,
                likes,
                comments,
            })
            .collect();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(ty: ActionType, status: ActionStatus, reaction_secs: Option<i64>) -> ReactionSample {
        let seen = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        ReactionSample {
            action_type: ty,
            status,
            first_seen_at: seen,
            completed_at: reaction_secs.map(|s| seen + Duration::seconds(s)),
        }
    }

    #[test]
    fn empty_samples_give_empty_summary() {
        let s = AnalyticsSummary::from_samples(&[]);
        assert_eq!(s.likes.total(), 0);
        assert_eq!(s.reaction_time.count, 0);
        assert!(s.reaction_time.avg_secs.is_none());
        assert!(s.daily_completed.is_empty());
    }

    #[test]
    fn counts_by_type_and_status() {
        let s = AnalyticsSummary::from_samples(&[
            sample(ActionType::Like, ActionStatus::Completed, Some(10)),
            sample(ActionType::Like, ActionStatus::Failed, None),
            sample(ActionType::Comment, ActionStatus::Pending, None),
            sample(ActionType::Comment, ActionStatus::Completed, Some(300)),
        ]);
        assert_eq!(s.likes.completed, 1);
        assert_eq!(s.likes.failed, 1);
        assert_eq!(s.comments.pending, 1);
        assert_eq!(s.comments.completed, 1);
        assert_eq!(s.daily_completed.len(), 1);
        assert_eq!(s.daily_completed[0].likes, 1);
        assert_eq!(s.daily_completed[0].comments, 1);
    }

    #[test]
    fn reaction_time_statistics() {
        let s = AnalyticsSummary::from_samples(&[
            sample(ActionType::Like, ActionStatus::Completed, Some(10)),
            sample(ActionType::Like, ActionStatus::Completed, Some(20)),
            sample(ActionType::Comment, ActionStatus::Completed, Some(60)),
            sample(ActionType::Comment, ActionStatus::Completed, Some(110)),
        ]);
        assert_eq!(s.reaction_time.count, 4);
        assert_eq!(s.reaction_time.avg_secs, Some(50.0));
        assert_eq!(s.reaction_time.median_secs, Some(40.0));
        assert_eq!(s.reaction_time.min_secs, Some(10));
        assert_eq!(s.reaction_time.max_secs, Some(110));
        assert_eq!(s.like_reaction_time.median_secs, Some(15.0));
        assert_eq!(s.comment_reaction_time.count, 2);
    }

    #[test]
    fn negative_reaction_clamped_to_zero() {
        let s = AnalyticsSummary::from_samples(&[sample(
            ActionType::Like,
            ActionStatus::Completed,
            Some(-30),
        )]);
        assert_eq!(s.reaction_time.min_secs, Some(0));
    }
}
