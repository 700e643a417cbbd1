//! Periodic re-check of subscriptions.
//!
//! Each cycle loads the due subscriptions, fetches fresh details through the
//! shared media client (bounded fan-out), evaluates the transition rules and
//! suppresses repeats against the per-subscription markers. A check commits
//! `last_checked` and the updated markers before its notification is handed
//! to the sink, so a failed write never produces a notification and a failed
//! fetch leaves the subscription due for the next cycle.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::{
    db::store::PersistenceStore,
    error::{AppError, AppResult},
    models::Subscription,
    services::{media_client::ExternalMediaClient, notifier::NotificationSink},
};

pub mod rules;

use rules::TransitionWindows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Minimum age of `last_checked` before a subscription is checked again
    pub update_interval: Duration,
    /// How often the loop wakes up to run a cycle
    pub cycle_interval: Duration,
    pub max_concurrent_checks: usize,
    pub windows: TransitionWindows,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(6 * 3600),
            cycle_interval: Duration::from_secs(6 * 3600),
            max_concurrent_checks: 4,
            windows: TransitionWindows::default(),
        }
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub due: usize,
    /// Fetched and committed, whether or not anything was sent
    pub checked: usize,
    pub notified: usize,
    pub suppressed: usize,
    pub failed: usize,
    /// Skipped because shutdown was requested mid-cycle
    pub cancelled: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub cycles_completed: u64,
    pub last_report: Option<CycleReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Quiet,
    Notified,
    Suppressed,
    Failed,
    Cancelled,
}

/// Marks a cycle as running for as long as it lives
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UpdateScheduler {
    store: Arc<dyn PersistenceStore>,
    client: Arc<ExternalMediaClient>,
    sink: Arc<dyn NotificationSink>,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
    running: AtomicBool,
    cycles_completed: AtomicU64,
    last_report: RwLock<Option<CycleReport>>,
}

impl UpdateScheduler {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        client: Arc<ExternalMediaClient>,
        sink: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            client,
            sink,
            config,
            shutdown,
            running: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            last_report: RwLock::new(None),
        }
    }

    /// Runs a cycle every `cycle_interval` until shutdown
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.config.cycle_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            cycle_interval_secs = self.config.cycle_interval.as_secs(),
            update_interval_secs = self.config.update_interval.as_secs(),
            "Update scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.run_cycle().await {
                    Ok(_) => {}
                    Err(AppError::Conflict(_)) => {
                        tracing::debug!("Previous update cycle still running, skipping tick");
                    }
                    Err(e) => tracing::error!(error = %e, "Update cycle failed"),
                },
                _ = shutdown.changed() => {
                    tracing::info!("Update scheduler stopped");
                    break;
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> AppResult<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Runs one cycle as of `now`; fails with `Conflict` if a cycle is already running
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> AppResult<CycleReport> {
        let _guard = CycleGuard::acquire(&self.running).ok_or_else(|| {
            AppError::Conflict("an update cycle is already running".to_string())
        })?;

        let started = tokio::time::Instant::now();
        let mut report = CycleReport {
            cycle_id: Uuid::new_v4(),
            started_at: now,
            ..Default::default()
        };

        let interval = self.config.update_interval;
        let due: Vec<Subscription> = self
            .store
            .due_subscriptions(now, interval)
            .await?
            .into_iter()
            .filter(|sub| sub.is_due(now, interval))
            .collect();
        report.due = due.len();

        tracing::info!(cycle_id = %report.cycle_id, due = report.due, "Update cycle started");

        let outcomes: Vec<CheckOutcome> = stream::iter(due)
            .map(|sub| async move {
                if self.shutdown_requested() {
                    return CheckOutcome::Cancelled;
                }
                self.check_subscription(sub, now).await
            })
            .buffer_unordered(self.config.max_concurrent_checks.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                CheckOutcome::Quiet => report.checked += 1,
                CheckOutcome::Notified => {
                    report.checked += 1;
                    report.notified += 1;
                }
                CheckOutcome::Suppressed => {
                    report.checked += 1;
                    report.suppressed += 1;
                }
                CheckOutcome::Failed => report.failed += 1,
                CheckOutcome::Cancelled => report.cancelled += 1,
            }
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            cycle_id = %report.cycle_id,
            due = report.due,
            checked = report.checked,
            notified = report.notified,
            suppressed = report.suppressed,
            failed = report.failed,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Update cycle complete"
        );

        *self.last_report.write().await = Some(report.clone());
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);

        Ok(report)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            last_report: self.last_report.read().await.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn check_subscription(&self, sub: Subscription, now: DateTime<Utc>) -> CheckOutcome {
        let media = sub.media_ref();

        let details = match self.client.details(media).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    tenant_id = sub.tenant_id,
                    external_id = sub.external_id,
                    kind = %sub.kind,
                    "Failed to fetch details, subscription stays due"
                );
                return CheckOutcome::Failed;
            }
        };

        let mut markers = sub.markers.clone();
        let mut suppressed = false;

        let intent = match rules::evaluate(&sub, &details, now.date_naive(), &self.config.windows) {
            Some(trigger) if markers.already_notified(trigger.kind, &trigger.reference) => {
                tracing::debug!(
                    tenant_id = sub.tenant_id,
                    external_id = sub.external_id,
                    notification = %trigger.kind,
                    reference = %trigger.reference,
                    "Already notified for this window"
                );
                suppressed = true;
                None
            }
            Some(trigger) => {
                markers.mark(trigger.kind, trigger.reference.clone());
                Some(trigger.into_intent(&sub, &details))
            }
            None => None,
        };

        if let Err(e) = self.store.record_check(sub.id, now, &markers).await {
            tracing::error!(
                error = %e,
                tenant_id = sub.tenant_id,
                external_id = sub.external_id,
                kind = %sub.kind,
                "Failed to record check, notification withheld"
            );
            return CheckOutcome::Failed;
        }

        let Some(intent) = intent else {
            return if suppressed {
                CheckOutcome::Suppressed
            } else {
                CheckOutcome::Quiet
            };
        };

        if let Err(e) = self
            .sink
            .dispatch(intent.tenant_id, intent.kind, &intent.payload)
            .await
        {
            tracing::warn!(
                error = %e,
                tenant_id = intent.tenant_id,
                external_id = sub.external_id,
                notification = %intent.kind,
                "Notification dispatch failed"
            );
        } else {
            tracing::info!(
                tenant_id = intent.tenant_id,
                external_id = sub.external_id,
                notification = %intent.kind,
                reference = %intent.reference,
                "Notification sent"
            );
        }

        CheckOutcome::Notified
    }
}
