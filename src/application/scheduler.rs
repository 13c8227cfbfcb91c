//! Periodic expiry and promotion scan.
//!
//! A scan may be entered from the in-process loop and from a host wake-up at
//! the same time. The [`ActivationRegistry`] decides which of them activates a
//! task window. Expiry and activation both go through the session lock, so a
//! scan working from a stale listing cannot expire the running task.

use crate::application::active_session::{spawn_ticker, SessionManager};
use crate::application::clock::{system_now, NowProvider};
use crate::domain::models::{Priority, Task};
use crate::infrastructure::config::{ScanOrigin, SchedulerConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::Notifier;
use crate::infrastructure::task_repository::{PendingFilter, TaskRepository};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

/// A task window: the same task becomes eligible again once its start moves.
pub type ActivationKey = (String, DateTime<Utc>);

#[derive(Debug, Default)]
pub struct ActivationRegistry {
    claimed: Mutex<HashSet<ActivationKey>>,
}

impl ActivationRegistry {
    fn lock(&self) -> MutexGuard<'_, HashSet<ActivationKey>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-and-insert in one step. Only the first caller for a key wins.
    pub fn try_claim(&self, task_id: &str, start: DateTime<Utc>) -> bool {
        self.lock().insert((task_id.to_string(), start))
    }

    pub fn release(&self, task_id: &str, start: DateTime<Utc>) {
        self.lock().remove(&(task_id.to_string(), start));
    }

    pub fn contains(&self, task_id: &str, start: DateTime<Utc>) -> bool {
        self.lock().contains(&(task_id.to_string(), start))
    }

    /// Drops keys whose window started before `cutoff`.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut claimed = self.lock();
        let before = claimed.len();
        claimed.retain(|(_, start)| *start >= cutoff);
        before - claimed.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub expired: Vec<String>,
    pub promoted: Option<String>,
    pub failures: usize,
}

pub struct Scheduler {
    repository: Arc<dyn TaskRepository>,
    sessions: Arc<SessionManager>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<ActivationRegistry>,
    now_provider: NowProvider,
    granularity_seconds: u32,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        sessions: Arc<SessionManager>,
        notifier: Arc<dyn Notifier>,
        registry: Arc<ActivationRegistry>,
    ) -> Self {
        Self {
            repository,
            sessions,
            notifier,
            registry,
            now_provider: system_now(),
            granularity_seconds: 60,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_granularity_seconds(mut self, seconds: u32) -> Self {
        self.granularity_seconds = seconds.max(1);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Expiry pass, then promotion pass. A failed read aborts the scan; a
    /// failed write only skips the task it concerns.
    pub async fn scan(&self) -> Result<ScanReport, InfraError> {
        let now = (self.now_provider)();
        let (bucket_start, bucket_end) = promotion_bucket(now, self.granularity_seconds);
        let active_task_id = self.sessions.active_task_id().await;
        let pending = self.repository.list_pending(&PendingFilter::timed())?;
        self.registry.prune_before(bucket_start);

        let mut report = ScanReport::default();
        for task in &pending {
            let Some(start) = task.start_time else {
                continue;
            };
            if start >= now || active_task_id.as_deref() == Some(task.id.as_str()) {
                continue;
            }
            let awaiting_promotion = task.priority == Priority::High
                && start >= bucket_start
                && !self.registry.contains(&task.id, start);
            if awaiting_promotion {
                continue;
            }
            match self.sessions.expire_unless_active(&task.id).await {
                Ok(None) => {}
                Ok(Some(_)) => {
                    tracing::debug!(task_id = %task.id, "task expired");
                    report.expired.push(task.id.clone());
                }
                Err(error) => {
                    tracing::warn!(task_id = %task.id, %error, "expiry skipped");
                    report.failures += 1;
                }
            }
        }

        let candidates = pending.iter().filter(|task| {
            task.priority == Priority::High
                && !report.expired.contains(&task.id)
                && task
                    .start_time
                    .is_some_and(|start| start >= bucket_start && start < bucket_end)
        });
        for task in candidates.take_while(|_| active_task_id.is_none()) {
            match self.promote(task).await {
                Ok(true) => {
                    report.promoted = Some(task.id.clone());
                    break;
                }
                Ok(false) => {}
                Err(InfraError::SessionAlreadyActive(_)) => break,
                Err(error) => {
                    tracing::warn!(task_id = %task.id, %error, "promotion failed");
                    report.failures += 1;
                }
            }
        }

        tracing::debug!(
            expired = report.expired.len(),
            promoted = report.promoted.as_deref().unwrap_or("-"),
            failures = report.failures,
            "scan finished"
        );
        Ok(report)
    }

    /// Returns `Ok(false)` when another scan already owns this window.
    async fn promote(&self, task: &Task) -> Result<bool, InfraError> {
        let Some(start) = task.start_time else {
            return Ok(false);
        };
        if !self.registry.try_claim(&task.id, start) {
            return Ok(false);
        }
        match self.sessions.begin_promoted(task.clone()).await {
            Ok(_) => {}
            Err(error) if error.is_repository_failure() => {
                // The session exists and retries its completion on the next tick.
                tracing::warn!(task_id = %task.id, %error, "promoted session completion deferred");
            }
            Err(error) => {
                self.registry.release(&task.id, start);
                return Err(error);
            }
        }
        let message = format!("{} started automatically", task.name);
        if let Err(error) = self.notifier.fire_now(&message).await {
            tracing::warn!(task_id = %task.id, %error, "auto-start alert not delivered");
        }
        tracing::info!(task_id = %task.id, "task promoted");
        Ok(true)
    }
}

/// `[start, end)` of the granularity bucket containing `now`.
pub fn promotion_bucket(now: DateTime<Utc>, granularity_seconds: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let granularity = i64::from(granularity_seconds.max(1));
    let offset = now.timestamp().rem_euclid(granularity);
    let start = DateTime::from_timestamp(now.timestamp() - offset, 0).unwrap_or(now);
    (start, start + ChronoDuration::seconds(granularity))
}

/// Running scan loop and ticker. Consumed by [`SchedulerHandle::stop`].
#[derive(Debug)]
pub struct SchedulerHandle {
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    scan_loop: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests one scan now, e.g. from an OS background refresh.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in [("scan loop", self.scan_loop), ("ticker", self.ticker)] {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "{name} did not stop cleanly");
            }
        }
        tracing::info!("scheduler stopped");
    }
}

pub fn start_scheduler(scheduler: Arc<Scheduler>, config: &SchedulerConfig) -> SchedulerHandle {
    let wake = Arc::new(Notify::new());
    let (shutdown, shutdown_rx) = watch::channel(false);
    let ticker = spawn_ticker(
        scheduler.sessions().clone(),
        Duration::from_millis(config.tick_interval_millis.max(1)),
        shutdown_rx.clone(),
    );
    let interval = match config.scan_origin {
        ScanOrigin::Foreground => {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config.scan_interval_seconds.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(interval)
        }
        ScanOrigin::Background => None,
    };
    tracing::info!(
        origin = ?config.scan_origin,
        scan_interval_seconds = config.scan_interval_seconds,
        "scheduler started"
    );
    let scan_loop = tokio::spawn(run_scan_loop(scheduler, interval, wake.clone(), shutdown_rx));
    SchedulerHandle {
        wake,
        shutdown,
        scan_loop,
        ticker,
    }
}

async fn run_scan_loop(
    scheduler: Arc<Scheduler>,
    mut interval: Option<Interval>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = next_period(&mut interval) => run_scan(&scheduler).await,
            _ = wake.notified() => run_scan(&scheduler).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn next_period(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_scan(scheduler: &Scheduler) {
    if let Err(error) = scheduler.scan().await {
        tracing::warn!(%error, "scan aborted");
    }
}
