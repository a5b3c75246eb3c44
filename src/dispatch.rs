//! # Dispatch — Per-Account Workers, Sink Invocation and Audit
//!
//! Due actions are claimed in batches (`pending → scheduled`) and routed to
//! one worker task per integration account. A worker owns that account's
//! [`PacingState`] and handles its commands strictly one at a time, in the
//! order they were claimed (oldest `scheduled_at` first). Accounts never
//! wait on each other.
//!
//! ## One attempt
//!
//! ```text
//! re-read action ─► throttle gate ─┬─ cancel ─► failed("cancelled")
//!                                  ├─ defer  ─► pending @ until
//!                                  └─ allow  ─► dispatched (attempts+1)
//!     ─► comment pipeline (comments only) ─► sink (with timeout)
//!     ─► completed | retry with backoff | failed | blocked (attempt refunded)
//! ```
//!
//! Every attempt that reaches `dispatched`, and every cancellation, appends
//! one audit entry. Terminal failures, cancellations and account state
//! changes also go to the event log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::audit::{AttemptOutcome, NewAuditEntry};
use crate::collaborators::{ActionSink, SinkRequest, SinkStatus};
use crate::comments::{CommentContext, CommentPipeline};
use crate::config::DispatchConfig;
use crate::error::{EngineError, FailureClass};
use crate::events::{EngineEvent, EventBus};
use crate::identity::detect_surface;
use crate::models::{
    AccountKey, AccountState, ActionStatus, ActionTransition, ActionType, EngagementAction,
    PacingState, Platform, Post, Surface,
};
use crate::prom_metrics::Metrics;
use crate::scheduler::user_offset;
use crate::store::Store;
use crate::throttle::{local_date, AttemptResult, GateDecision, StateChange, ThrottleController};

/// Everything a worker needs; shared by all workers.
pub struct DispatchContext {
    pub store: Arc<dyn Store>,
    pub sink: Arc<dyn ActionSink>,
    pub comments: Arc<CommentPipeline>,
    pub throttle: Arc<ThrottleController>,
    pub events: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
    pub config: DispatchConfig,
}

enum AccountCommand {
    Process(Box<EngagementAction>),
    /// A `dispatched` row nobody finished; count it as a timed-out attempt.
    Expire(Box<EngagementAction>),
    Maintain,
}

/// What happened to one action handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The row was no longer `scheduled` when the worker reached it.
    Skipped,
    Deferred { until: DateTime<Utc> },
    Cancelled,
    Completed,
    Retrying { next_at: DateTime<Utc> },
    Failed { error: String },
    Blocked,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub requeued_scheduled: usize,
    pub expired_dispatched: usize,
}

fn platform_surface(platform: Platform) -> Surface {
    match platform {
        Platform::Linkedin => Surface::Linkedin,
        Platform::Meta => Surface::Facebook,
    }
}

// ── Worker ──────────────────────────────────────────────────────

/// Sole owner of one account's pacing state.
pub struct AccountWorker {
    key: AccountKey,
    ctx: Arc<DispatchContext>,
    state: Option<PacingState>,
    org_id: Option<Uuid>,
}

impl AccountWorker {
    pub fn new(key: AccountKey, ctx: Arc<DispatchContext>) -> Self {
        AccountWorker {
            key,
            ctx,
            state: None,
            org_id: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<AccountCommand>) {
        debug!(account = %self.key, "Dispatch worker started");
        while let Some(cmd) = rx.recv().await {
            let now = Utc::now();
            let result = match cmd {
                AccountCommand::Process(action) => self.process(*action, now).await.map(|_| ()),
                AccountCommand::Expire(action) => self.expire(*action, now).await,
                AccountCommand::Maintain => self.maintain(now).await,
            };
            if let Err(e) = result {
                // Drop the cached state so the next command reloads from the store.
                self.state = None;
                error!(account = %self.key, error = %format!("{:#}", e), "Dispatch worker command failed");
            }
        }
        self.ctx.metrics.dispatch_workers.dec();
        debug!(account = %self.key, "Dispatch worker stopped");
    }

    async fn load_state(&mut self, now: DateTime<Utc>) -> Result<PacingState> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }
        let state = match self.ctx.store.load_pacing(self.key).await? {
            Some(s) => s,
            None => {
                let settings = self.ctx.store.user_settings(self.key.user_id).await?;
                let today = local_date(now, user_offset(&settings));
                PacingState::new(self.key, settings.risk_profile, today)
            }
        };
        Ok(state)
    }

    async fn save_state(&mut self, state: PacingState) -> Result<()> {
        self.ctx.store.save_pacing(&state).await?;
        self.state = Some(state);
        Ok(())
    }

    async fn record_change(&self, change: StateChange, now: DateTime<Utc>) -> Result<()> {
        info!(account = %change.key, from = %change.from, to = %change.to, reason = %change.reason, "Account state transition");
        if let Some(org_id) = self.org_id {
            self.ctx
                .store
                .append_audit(NewAuditEntry::account_state(
                    org_id,
                    change.key,
                    change.from,
                    change.to,
                    &change.reason,
                ))
                .await?;
        }
        self.ctx.events.emit_at(
            EngineEvent::AccountStateChanged {
                key: change.key,
                from: change.from,
                to: change.to,
                reason: change.reason,
            },
            now,
        );
        Ok(())
    }

    async fn record_changes(&self, changes: Vec<StateChange>, now: DateTime<Utc>) -> Result<()> {
        for change in changes {
            self.record_change(change, now).await?;
        }
        Ok(())
    }

    /// Day roll, throttle recovery and blocked-session recheck.
    pub async fn maintain(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.load_state(now).await?;
        let settings = self.ctx.store.user_settings(self.key.user_id).await?;
        let mut changes: Vec<StateChange> = self
            .ctx
            .throttle
            .maintain(&mut state, user_offset(&settings), now)
            .into_iter()
            .collect();
        changes.extend(self.ctx.throttle.recheck_session(&mut state).await);
        self.save_state(state).await?;
        self.record_changes(changes, now).await
    }

    /// Run one claimed action through gate, pipeline and sink.
    pub async fn process(
        &mut self,
        action: EngagementAction,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        let ctx = self.ctx.clone();
        let Some(action) = ctx.store.get_action(action.id).await? else {
            return Ok(ProcessOutcome::Skipped);
        };
        if action.status != ActionStatus::Scheduled {
            debug!(action_id = %action.id, status = %action.status, "Skipping action no longer scheduled");
            return Ok(ProcessOutcome::Skipped);
        }
        self.org_id = Some(action.org_id);

        let mut state = self.load_state(now).await?;
        let settings = ctx.store.user_settings(action.user_id).await?;
        let (decision, changes) = ctx.throttle.gate(&mut state, &action, &settings, now).await?;
        self.save_state(state).await?;
        self.record_changes(changes, now).await?;

        match decision {
            GateDecision::Cancel { reason } => {
                let error = EngineError::Cancelled { reason }.to_string();
                ctx.store
                    .transition_action(
                        action.id,
                        ActionTransition::Fail {
                            error_message: "cancelled".into(),
                        },
                        now,
                    )
                    .await?;
                ctx.store
                    .append_audit(NewAuditEntry::attempt(
                        &action,
                        AttemptOutcome::Cancelled,
                        now,
                        None,
                        Some(error.clone()),
                        None,
                    ))
                    .await?;
                ctx.metrics
                    .record_outcome(action.action_type.as_str(), "cancelled");
                ctx.events.emit_at(
                    EngineEvent::ActionFailed {
                        action_id: action.id,
                        user_id: action.user_id,
                        action_type: action.action_type,
                        reason: error,
                    },
                    now,
                );
                return Ok(ProcessOutcome::Cancelled);
            }
            GateDecision::Defer {
                until,
                reason,
                detail,
            } => {
                ctx.store
                    .transition_action(
                        action.id,
                        ActionTransition::Requeue {
                            scheduled_at: until,
                            error_message: Some(detail),
                            refund_attempt: false,
                        },
                        now,
                    )
                    .await?;
                ctx.metrics.record_deferral(reason.as_str());
                return Ok(ProcessOutcome::Deferred { until });
            }
            GateDecision::Allow => {}
        }

        let Some(action) = ctx.store.mark_dispatched(action.id, now).await? else {
            return Ok(ProcessOutcome::Skipped);
        };
        let Some(post) = ctx.store.get_post(action.post_id).await? else {
            return self
                .fail_terminal(&action, "post not found".into(), None, now)
                .await;
        };

        let mut comment_text = None;
        if action.action_type == ActionType::Comment {
            match self.draft_comment(&action, &post).await {
                Ok(text) => comment_text = Some(text),
                Err(EngineError::ContentPolicyViolation { reasons }) => {
                    ctx.metrics.compliance_rejections.inc();
                    warn!(action_id = %action.id, reasons = %reasons.join("; "), "No compliant comment candidate");
                    return self
                        .fail_terminal(
                            &action,
                            EngineError::ContentPolicyViolation { reasons }.to_string(),
                            Some(post.url.clone()),
                            now,
                        )
                        .await;
                }
                Err(e) => {
                    // Drafting trouble is not the account's fault; no throttle escalation.
                    return self
                        .fail_retryable(&action, e.to_string(), Some(post.url.clone()), false, now)
                        .await;
                }
            }
        }

        let request = SinkRequest {
            user_id: action.user_id,
            platform: action.platform,
            target_post_ref: post.url.clone(),
            external_post_id: post.external_post_id.clone(),
            action_type: action.action_type,
            comment_text: comment_text.clone(),
        };
        let timeout = StdDuration::from_secs(ctx.config.sink_timeout_secs.max(1));
        let error = match tokio::time::timeout(timeout, ctx.sink.execute(&request)).await {
            Ok(Ok(result)) if result.status == SinkStatus::Completed => {
                return self
                    .complete(&action, comment_text, post.url.clone(), now)
                    .await;
            }
            Ok(Ok(result)) => EngineError::from_sink_failure(
                result.error_class.as_deref(),
                result
                    .error_message
                    .as_deref()
                    .unwrap_or("sink reported failure"),
            ),
            Ok(Err(e)) => EngineError::TransientNetwork(format!("{:#}", e)),
            Err(_) => EngineError::TransientNetwork(format!(
                "sink timed out after {}s",
                timeout.as_secs()
            )),
        };

        let class = error.failure_class().unwrap_or(FailureClass::Retryable);
        let message = error.to_string();
        let post_url = Some(post.url.clone());
        match class {
            FailureClass::Retryable => self.fail_retryable(&action, message, post_url, true, now).await,
            FailureClass::Terminal => {
                self.apply_attempt(action.action_type, AttemptResult::Failed(class), now)
                    .await?;
                self.fail_terminal(&action, message, post_url, now).await
            }
            FailureClass::Auth => self.block(&action, message, post_url, now).await,
        }
    }

    async fn draft_comment(
        &self,
        action: &EngagementAction,
        post: &Post,
    ) -> Result<String, EngineError> {
        let transient = |e: anyhow::Error| EngineError::TransientNetwork(format!("{:#}", e));
        let tags = self
            .ctx
            .store
            .get_subscription(action.tracked_page_id, action.user_id)
            .await
            .map_err(transient)?
            .map(|s| s.tags)
            .unwrap_or_default();
        let surface = Url::parse(&post.url)
            .ok()
            .and_then(|u| detect_surface(&u))
            .unwrap_or_else(|| platform_surface(action.platform));
        let chosen = self
            .ctx
            .comments
            .produce(&CommentContext {
                org_id: action.org_id,
                user_id: action.user_id,
                surface,
                post_content: post
                    .content_text
                    .clone()
                    .unwrap_or_else(|| format!("(post at {})", post.url)),
                page_tags: tags,
            })
            .await?;
        if chosen.rewritten {
            self.ctx.metrics.compliance_rewrites.inc();
        }
        Ok(chosen.text)
    }

    async fn apply_attempt(
        &mut self,
        action_type: ActionType,
        result: AttemptResult,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.load_state(now).await?;
        let change = self.ctx.throttle.record(&mut state, action_type, result, now);
        self.save_state(state).await?;
        if let Some(change) = change {
            self.record_change(change, now).await?;
        }
        Ok(())
    }

    async fn complete(
        &mut self,
        action: &EngagementAction,
        comment_text: Option<String>,
        post_url: String,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        self.ctx
            .store
            .transition_action(
                action.id,
                ActionTransition::Complete {
                    completed_at: now,
                    comment_text: comment_text.clone(),
                },
                now,
            )
            .await?;
        self.apply_attempt(action.action_type, AttemptResult::Completed, now)
            .await?;
        self.ctx
            .store
            .append_audit(NewAuditEntry::attempt(
                action,
                AttemptOutcome::Completed,
                now,
                comment_text,
                None,
                Some(post_url),
            ))
            .await?;
        self.ctx
            .metrics
            .record_outcome(action.action_type.as_str(), "completed");
        info!(action_id = %action.id, account = %self.key, action_type = %action.action_type, "Action completed");
        Ok(ProcessOutcome::Completed)
    }

    async fn fail_terminal(
        &mut self,
        action: &EngagementAction,
        error: String,
        post_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        self.ctx
            .store
            .transition_action(
                action.id,
                ActionTransition::Fail {
                    error_message: error.clone(),
                },
                now,
            )
            .await?;
        self.ctx
            .store
            .append_audit(NewAuditEntry::attempt(
                action,
                AttemptOutcome::Failed,
                now,
                None,
                Some(error.clone()),
                post_url,
            ))
            .await?;
        self.ctx
            .metrics
            .record_outcome(action.action_type.as_str(), "failed");
        self.ctx.events.emit_at(
            EngineEvent::ActionFailed {
                action_id: action.id,
                user_id: action.user_id,
                action_type: action.action_type,
                reason: error.clone(),
            },
            now,
        );
        Ok(ProcessOutcome::Failed { error })
    }

    async fn fail_retryable(
        &mut self,
        action: &EngagementAction,
        error: String,
        post_url: Option<String>,
        counts_for_throttle: bool,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        if counts_for_throttle {
            self.apply_attempt(
                action.action_type,
                AttemptResult::Failed(FailureClass::Retryable),
                now,
            )
            .await?;
        }
        let attempts = action.attempts.max(1) as u32;
        if attempts >= self.ctx.config.max_attempts {
            let error = format!("{} (after {} attempts)", error, attempts);
            return self.fail_terminal(action, error, post_url, now).await;
        }
        let next_at = now + self.ctx.config.backoff(attempts);
        self.ctx
            .store
            .transition_action(
                action.id,
                ActionTransition::Requeue {
                    scheduled_at: next_at,
                    error_message: Some(error.clone()),
                    refund_attempt: false,
                },
                now,
            )
            .await?;
        self.ctx
            .store
            .append_audit(NewAuditEntry::attempt(
                action,
                AttemptOutcome::Retrying,
                now,
                None,
                Some(error.clone()),
                post_url,
            ))
            .await?;
        self.ctx
            .metrics
            .record_outcome(action.action_type.as_str(), "retrying");
        warn!(action_id = %action.id, attempt = attempts, %next_at, %error, "Retryable dispatch failure");
        Ok(ProcessOutcome::Retrying { next_at })
    }

    async fn block(
        &mut self,
        action: &EngagementAction,
        error: String,
        post_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        self.apply_attempt(
            action.action_type,
            AttemptResult::Failed(FailureClass::Auth),
            now,
        )
        .await?;
        let recheck = now + self.ctx.throttle.config().blocked_recheck();
        self.ctx
            .store
            .transition_action(
                action.id,
                ActionTransition::Requeue {
                    scheduled_at: recheck,
                    error_message: Some(error.clone()),
                    refund_attempt: true,
                },
                now,
            )
            .await?;
        self.ctx
            .store
            .append_audit(NewAuditEntry::attempt(
                action,
                AttemptOutcome::Blocked,
                now,
                None,
                Some(error),
                post_url,
            ))
            .await?;
        self.ctx
            .metrics
            .record_outcome(action.action_type.as_str(), "blocked");
        Ok(ProcessOutcome::Blocked)
    }

    /// Treat an abandoned `dispatched` row as a timed-out attempt.
    pub async fn expire(&mut self, action: EngagementAction, now: DateTime<Utc>) -> Result<()> {
        let Some(current) = self.ctx.store.get_action(action.id).await? else {
            return Ok(());
        };
        if current.status != ActionStatus::Dispatched || current.attempted_at != action.attempted_at
        {
            return Ok(());
        }
        self.org_id = Some(current.org_id);
        let post_url = self
            .ctx
            .store
            .get_post(current.post_id)
            .await?
            .map(|p| p.url);
        self.fail_retryable(
            &current,
            EngineError::TransientNetwork("dispatch attempt abandoned".into()).to_string(),
            post_url,
            true,
            now,
        )
        .await?;
        Ok(())
    }
}

// ── Dispatcher ──────────────────────────────────────────────────

/// Routes claimed actions to per-account workers.
pub struct Dispatcher {
    ctx: Arc<DispatchContext>,
    workers: Mutex<HashMap<AccountKey, mpsc::Sender<AccountCommand>>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<DispatchContext>) -> Self {
        Dispatcher {
            ctx,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.ctx
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<AccountKey, mpsc::Sender<AccountCommand>>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sender(&self, key: AccountKey) -> mpsc::Sender<AccountCommand> {
        let mut workers = self.workers();
        if let Some(tx) = workers.get(&key).filter(|tx| !tx.is_closed()) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(self.ctx.config.queue_capacity.max(1));
        let worker = AccountWorker::new(key, self.ctx.clone());
        self.ctx.metrics.dispatch_workers.inc();
        tokio::spawn(worker.run(rx));
        workers.insert(key, tx.clone());
        tx
    }

    async fn route(&self, key: AccountKey, cmd: AccountCommand) -> Result<()> {
        let tx = self.sender(key);
        tx.send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("dispatch worker for {} is gone", key))
    }

    /// Claim due actions and hand them to their account workers.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let claimed = self
            .ctx
            .store
            .claim_due_actions(now, self.ctx.config.batch_size)
            .await
            .context("claim due actions")?;
        let n = claimed.len();
        for action in claimed {
            self.route(action.account(), AccountCommand::Process(Box::new(action)))
                .await?;
        }
        if n > 0 {
            debug!(claimed = n, "Routed due actions");
        }
        Ok(n)
    }

    /// Claim and process due actions in the calling task, one account after
    /// another. For one-shot runs; never mix with running workers.
    pub async fn dispatch_due_inline(&self, now: DateTime<Utc>) -> Result<Vec<ProcessOutcome>> {
        let claimed = self
            .ctx
            .store
            .claim_due_actions(now, self.ctx.config.batch_size)
            .await
            .context("claim due actions")?;
        let mut groups: Vec<(AccountKey, Vec<EngagementAction>)> = Vec::new();
        for action in claimed {
            let key = action.account();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, list)) => list.push(action),
                None => groups.push((key, vec![action])),
            }
        }
        let mut outcomes = Vec::new();
        for (key, actions) in groups {
            let mut worker = AccountWorker::new(key, self.ctx.clone());
            for action in actions {
                outcomes.push(worker.process(action, now).await?);
            }
        }
        Ok(outcomes)
    }

    /// Ask every known account's worker to run its maintenance pass and
    /// refresh the account gauges.
    pub async fn maintain_accounts(&self) -> Result<()> {
        let states = self.ctx.store.list_pacing().await?;
        let throttled = states
            .iter()
            .filter(|s| s.state == AccountState::Throttled)
            .count();
        let blocked = states
            .iter()
            .filter(|s| s.state == AccountState::Blocked)
            .count();
        self.ctx.metrics.accounts_throttled.set(throttled as i64);
        self.ctx.metrics.accounts_blocked.set(blocked as i64);
        for state in states {
            self.route(state.key(), AccountCommand::Maintain).await?;
        }
        Ok(())
    }

    /// Return stuck rows to the queue.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let scheduled_cutoff =
            now - chrono::Duration::seconds(self.ctx.config.stale_scheduled_secs as i64);
        for action in self
            .ctx
            .store
            .stale_actions(ActionStatus::Scheduled, scheduled_cutoff)
            .await?
        {
            self.ctx
                .store
                .transition_action(
                    action.id,
                    ActionTransition::Requeue {
                        scheduled_at: now,
                        error_message: action.error_message.clone(),
                        refund_attempt: false,
                    },
                    now,
                )
                .await?;
            report.requeued_scheduled += 1;
        }

        let dispatched_cutoff =
            now - chrono::Duration::seconds(self.ctx.config.stale_dispatched_secs as i64);
        for action in self
            .ctx
            .store
            .stale_actions(ActionStatus::Dispatched, dispatched_cutoff)
            .await?
        {
            self.route(action.account(), AccountCommand::Expire(Box::new(action)))
                .await?;
            report.expired_dispatched += 1;
        }

        if report != SweepReport::default() {
            warn!(
                requeued = report.requeued_scheduled,
                expired = report.expired_dispatched,
                "Swept stale actions"
            );
        }
        Ok(report)
    }
}
