//! TOML engine configuration, parsing, and validation.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! configuration. Per-user and per-org settings live in the store and are read
//! at decision time; this file only holds engine-wide tunables.
//!
//! ```toml
//! [scheduler]
//! comment_window_min_secs = 120
//! comment_window_max_secs = 1200
//!
//! [throttle]
//! failure_threshold = 3
//! cooldown_secs = 1800
//!
//! [throttle.safe]
//! daily_likes = 50
//! daily_comments = 20
//! ```

use anyhow::Result;
use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{ActionType, RiskProfile};

// ── TOML Configuration Structs ──────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub discovery: DiscoveryConfig,
    pub scheduler: SchedulerConfig,
    pub throttle: ThrottleConfig,
    pub dispatch: DispatchConfig,
    pub comments: CommentsConfig,
}

/// The `[discovery]` section: poll cadence and the hunt window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub normal_interval_min_secs: u64,
    pub normal_interval_max_secs: u64,
    pub hunt_interval_min_secs: u64,
    pub hunt_interval_max_secs: u64,
    /// Local-time window in which hunt cadence applies, `HH:MM`.
    pub hunt_window_start: String,
    pub hunt_window_end: String,
    pub tick_secs: u64,
    pub poll_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            normal_interval_min_secs: 300,
            normal_interval_max_secs: 900,
            hunt_interval_min_secs: 30,
            hunt_interval_max_secs: 60,
            hunt_window_start: "07:00".into(),
            hunt_window_end: "10:00".into(),
            tick_secs: 5,
            poll_timeout_secs: 60,
        }
    }
}

impl DiscoveryConfig {
    pub fn hunt_window(&self) -> Result<(NaiveTime, NaiveTime)> {
        Ok((
            parse_hhmm(&self.hunt_window_start)?,
            parse_hhmm(&self.hunt_window_end)?,
        ))
    }
}

/// The `[scheduler]` section: default comment stagger window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub comment_window_min_secs: u64,
    pub comment_window_max_secs: u64,
    /// Delay applied to likes. Zero keeps likes immediate.
    pub like_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            comment_window_min_secs: 120,
            comment_window_max_secs: 1200,
            like_delay_secs: 0,
        }
    }
}

/// Daily caps and minimum spacing for one risk profile.
///
/// Keys missing from a `[throttle.safe]` / `[throttle.aggro]` table keep that
/// profile's own defaults.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskLimits {
    pub daily_likes: u32,
    pub daily_comments: u32,
    /// Minimum gap between two dispatches on the same account.
    pub pacing_gap_secs: u64,
    /// Cap multiplier on Saturday and Sunday. Only the safe profile is dampened.
    pub weekend_factor: f64,
}

/// The keys a risk table may set; unset ones fall through to the profile base.
#[derive(Deserialize)]
struct RiskLimitsTable {
    daily_likes: Option<u32>,
    daily_comments: Option<u32>,
    pacing_gap_secs: Option<u64>,
    weekend_factor: Option<f64>,
}

impl RiskLimitsTable {
    fn over(self, base: RiskLimits) -> RiskLimits {
        RiskLimits {
            daily_likes: self.daily_likes.unwrap_or(base.daily_likes),
            daily_comments: self.daily_comments.unwrap_or(base.daily_comments),
            pacing_gap_secs: self.pacing_gap_secs.unwrap_or(base.pacing_gap_secs),
            weekend_factor: self.weekend_factor.unwrap_or(base.weekend_factor),
        }
    }
}

fn safe_limits<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<RiskLimits, D::Error> {
    Ok(RiskLimitsTable::deserialize(d)?.over(RiskLimits::safe()))
}

fn aggro_limits<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<RiskLimits, D::Error> {
    Ok(RiskLimitsTable::deserialize(d)?.over(RiskLimits::aggro()))
}

impl RiskLimits {
    pub fn safe() -> Self {
        RiskLimits {
            daily_likes: 50,
            daily_comments: 20,
            pacing_gap_secs: 45,
            weekend_factor: 0.5,
        }
    }

    pub fn aggro() -> Self {
        RiskLimits {
            daily_likes: 150,
            daily_comments: 60,
            pacing_gap_secs: 15,
            weekend_factor: 1.0,
        }
    }

    pub fn daily_cap(&self, action_type: ActionType) -> u32 {
        match action_type {
            ActionType::Like => self.daily_likes,
            ActionType::Comment => self.daily_comments,
        }
    }
}

/// The `[throttle]` section: escalation thresholds and per-profile limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window_secs: u64,
    pub cooldown_secs: u64,
    pub pacing_multiplier: u32,
    /// How often a blocked account's actions are re-examined.
    pub blocked_recheck_secs: u64,
    #[serde(default = "RiskLimits::safe", deserialize_with = "safe_limits")]
    pub safe: RiskLimits,
    #[serde(default = "RiskLimits::aggro", deserialize_with = "aggro_limits")]
    pub aggro: RiskLimits,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            failure_threshold: 3,
            failure_window_secs: 3600,
            cooldown_secs: 1800,
            pacing_multiplier: 3,
            blocked_recheck_secs: 900,
            safe: RiskLimits::safe(),
            aggro: RiskLimits::aggro(),
        }
    }
}

impl ThrottleConfig {
    pub fn limits(&self, profile: RiskProfile) -> &RiskLimits {
        match profile {
            RiskProfile::Safe => &self.safe,
            RiskProfile::Aggro => &self.aggro,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::seconds(self.failure_window_secs as i64)
    }

    pub fn blocked_recheck(&self) -> Duration {
        Duration::seconds(self.blocked_recheck_secs as i64)
    }
}

/// The `[dispatch]` section: retry policy and worker loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub sink_timeout_secs: u64,
    pub tick_secs: u64,
    pub batch_size: i64,
    /// `scheduled` rows older than this return to `pending`.
    pub stale_scheduled_secs: u64,
    /// `dispatched` rows older than this count as a timed-out attempt.
    pub stale_dispatched_secs: u64,
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            max_attempts: 3,
            backoff_base_secs: 300,
            sink_timeout_secs: 120,
            tick_secs: 5,
            batch_size: 50,
            stale_scheduled_secs: 1800,
            stale_dispatched_secs: 600,
            queue_capacity: 256,
        }
    }
}

impl DispatchConfig {
    /// Exponential backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::seconds((self.backoff_base_secs as i64).saturating_mul(1_i64 << exp))
    }
}

/// The `[comments]` section: drafting model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentsConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_candidates: usize,
    pub max_sentences: usize,
    pub request_timeout_secs: u64,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        CommentsConfig {
            base_url: "https://openrouter.ai/api/v1".into(),
            model: "anthropic/claude-sonnet-4".into(),
            temperature: 0.8,
            max_tokens: 500,
            max_candidates: 3,
            max_sentences: 3,
            request_timeout_secs: 60,
        }
    }
}

// ── TOML Parsing ────────────────────────────────────────────────

/// Parse engine configuration from a TOML string.
pub fn parse_toml(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse engine configuration from a file, or defaults when no path is given.
pub fn load(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .map_err(|e| anyhow::anyhow!("reading {}: {}", p.display(), e))?;
            parse_toml(&content)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn validate_config(config: &EngineConfig) -> Result<()> {
    let d = &config.discovery;
    if d.normal_interval_min_secs == 0 || d.normal_interval_min_secs > d.normal_interval_max_secs {
        anyhow::bail!("discovery.normal_interval_min_secs must be in 1..=normal_interval_max_secs");
    }
    if d.hunt_interval_min_secs == 0 || d.hunt_interval_min_secs > d.hunt_interval_max_secs {
        anyhow::bail!("discovery.hunt_interval_min_secs must be in 1..=hunt_interval_max_secs");
    }
    d.hunt_window()?;

    let s = &config.scheduler;
    if s.comment_window_min_secs == 0 || s.comment_window_min_secs > s.comment_window_max_secs {
        anyhow::bail!("scheduler.comment_window_min_secs must be in 1..=comment_window_max_secs");
    }

    let t = &config.throttle;
    if t.failure_threshold == 0 {
        anyhow::bail!("throttle.failure_threshold must be at least 1");
    }
    if t.pacing_multiplier == 0 {
        anyhow::bail!("throttle.pacing_multiplier must be at least 1");
    }
    if !(0.0..=1.0).contains(&t.safe.weekend_factor) {
        anyhow::bail!("throttle.safe.weekend_factor must be within 0.0..=1.0");
    }
    if t.aggro.weekend_factor != 1.0 {
        anyhow::bail!("throttle.aggro.weekend_factor must be 1.0; aggro caps are never weekend-dampened");
    }
    for ty in [ActionType::Like, ActionType::Comment] {
        if t.aggro.daily_cap(ty) <= t.safe.daily_cap(ty) {
            anyhow::bail!(
                "throttle.aggro.daily_{}s must be higher than throttle.safe.daily_{}s",
                ty.as_str(),
                ty.as_str()
            );
        }
    }

    if config.dispatch.max_attempts == 0 {
        anyhow::bail!("dispatch.max_attempts must be at least 1");
    }
    if config.comments.max_candidates == 0 || config.comments.max_candidates > 3 {
        anyhow::bail!("comments.max_candidates must be between 1 and 3");
    }
    Ok(())
}

/// Parse a `HH:MM` (or `HH:MM:SS`) local time.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(|_| anyhow::anyhow!("invalid time '{}', expected HH:MM", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = parse_toml("").unwrap();
        assert_eq!(cfg.throttle.failure_threshold, 3);
        assert_eq!(cfg.throttle.cooldown_secs, 1800);
        assert_eq!(cfg.throttle.pacing_multiplier, 3);
        assert_eq!(cfg.scheduler.comment_window_min_secs, 120);
        assert_eq!(cfg.scheduler.comment_window_max_secs, 1200);
        assert_eq!(cfg.dispatch.max_attempts, 3);
        assert_eq!(cfg.throttle.safe.daily_likes, 50);
        assert_eq!(cfg.throttle.aggro.daily_likes, 150);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_toml(
            r#"
            [throttle]
            cooldown_secs = 600

            [throttle.safe]
            daily_likes = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.throttle.cooldown_secs, 600);
        assert_eq!(cfg.throttle.failure_threshold, 3);
        assert_eq!(cfg.throttle.safe.daily_likes, 10);
        assert_eq!(cfg.throttle.safe.daily_comments, 20);
        assert_eq!(cfg.throttle.aggro.daily_comments, 60);
    }

    #[test]
    fn partial_aggro_table_keeps_aggro_defaults() {
        let cfg = parse_toml("[throttle.aggro]\npacing_gap_secs = 10\n").unwrap();
        assert_eq!(cfg.throttle.aggro.pacing_gap_secs, 10);
        assert_eq!(cfg.throttle.aggro.daily_likes, 150);
        assert_eq!(cfg.throttle.aggro.daily_comments, 60);
        assert_eq!(cfg.throttle.aggro.weekend_factor, 1.0);
        assert_eq!(cfg.throttle.safe, RiskLimits::safe());
    }

    #[test]
    fn safe_caps_at_or_above_aggro_rejected() {
        let err = parse_toml("[throttle.safe]\ndaily_likes = 200\n").unwrap_err();
        assert!(err.to_string().contains("daily_likes"));
        let err = parse_toml("[throttle.aggro]\ndaily_comments = 20\n").unwrap_err();
        assert!(err.to_string().contains("daily_comments"));
    }

    #[test]
    fn aggro_weekend_dampening_rejected() {
        let err = parse_toml("[throttle.aggro]\nweekend_factor = 0.2\n").unwrap_err();
        assert!(err.to_string().contains("aggro.weekend_factor"));
    }

    #[test]
    fn inverted_comment_window_rejected() {
        let err = parse_toml(
            r#"
            [scheduler]
            comment_window_min_secs = 600
            comment_window_max_secs = 60
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("comment_window_min_secs"));
    }

    #[test]
    fn bad_hunt_window_rejected() {
        assert!(parse_toml("[discovery]\nhunt_window_start = \"25:99\"").is_err());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let d = DispatchConfig::default();
        assert_eq!(d.backoff(1), Duration::minutes(5));
        assert_eq!(d.backoff(2), Duration::minutes(10));
        assert_eq!(d.backoff(3), Duration::minutes(20));
    }

    #[test]
    fn aggro_caps_exceed_safe_caps() {
        let t = ThrottleConfig::default();
        for ty in [ActionType::Like, ActionType::Comment] {
            assert!(t.aggro.daily_cap(ty) > t.safe.daily_cap(ty));
        }
    }

    #[test]
    fn parse_hhmm_accepts_seconds() {
        assert_eq!(parse_hhmm("07:30").unwrap(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(parse_hhmm("22:00:00").unwrap(), NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        assert!(parse_hhmm("7pm").is_err());
    }
}
