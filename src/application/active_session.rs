//! Owner of the single [`ActiveSession`].
//!
//! Every operation takes the one async lock around `Option<ActiveSession>`,
//! so "is a session running" and "create one" are a single step for both
//! manual starts and scheduler promotions. Observers read snapshots from a
//! watch channel instead of the session itself.

use crate::application::clock::{system_now, NowProvider};
use crate::domain::models::{Task, TaskMutation, POMODORO_CYCLES_TO_COMPLETE};
use crate::domain::session::{ActiveSession, SessionPhase, SessionSnapshot, TickOutcome};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::Notifier;
use crate::infrastructure::task_repository::TaskRepository;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    BreakStarted { cycle: u32 },
    WorkResumed,
    /// The session was discarded; carries the task as stored afterwards.
    Finished(Box<Task>),
}

pub struct SessionManager {
    session: Mutex<Option<ActiveSession>>,
    repository: Arc<dyn TaskRepository>,
    notifier: Arc<dyn Notifier>,
    now_provider: NowProvider,
    break_seconds: AtomicU32,
    suspended: AtomicBool,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
        break_seconds: u32,
    ) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::idle());
        Self {
            session: Mutex::new(None),
            repository,
            notifier,
            now_provider: system_now(),
            break_seconds: AtomicU32::new(break_seconds),
            suspended: AtomicBool::new(false),
            snapshots,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn set_break_seconds(&self, seconds: u32) {
        self.break_seconds.store(seconds, Ordering::SeqCst);
    }

    /// Pauses the countdown until the next `reconcile`, which accounts for
    /// the suspended wall-clock time in one step.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session
            .lock()
            .await
            .as_ref()
            .map(ActiveSession::snapshot)
            .unwrap_or_else(SessionSnapshot::idle)
    }

    pub async fn current_task(&self) -> Option<Task> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.task.clone())
    }

    pub async fn active_task_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.task_id().to_string())
    }

    pub async fn time_remaining_display(&self) -> String {
        self.snapshot().await.display
    }

    /// User start. Fails with `SessionAlreadyActive` instead of queueing.
    pub async fn start_manual(&self, task_id: &str) -> Result<SessionSnapshot, InfraError> {
        let mut slot = self.session.lock().await;
        if let Some(existing) = slot.as_ref() {
            return Err(InfraError::SessionAlreadyActive(existing.task_id().to_string()));
        }
        let task = self
            .repository
            .get(task_id)?
            .ok_or_else(|| InfraError::TaskNotFound(task_id.to_string()))?;
        let session = ActiveSession::start_manual(task, (self.now_provider)())
            .map_err(InfraError::InvalidTaskState)?;
        self.arm(&session).await;
        tracing::info!(task_id, remaining = session.remaining_seconds, "session started");
        *slot = Some(session);
        self.publish(&slot);
        Ok(self.snapshots.borrow().clone())
    }

    /// Scheduler start. A window that has already fully passed finishes at once.
    /// The stored task must still be pending with the same start, since a
    /// concurrent scan may have expired it after `task` was listed.
    pub async fn begin_promoted(&self, task: Task) -> Result<SessionSnapshot, InfraError> {
        let mut slot = self.session.lock().await;
        if let Some(existing) = slot.as_ref() {
            return Err(InfraError::SessionAlreadyActive(existing.task_id().to_string()));
        }
        let task = self
            .repository
            .get(&task.id)?
            .filter(|stored| stored.is_pending() && stored.start_time == task.start_time)
            .ok_or_else(|| InfraError::InvalidTaskState(format!("task {} is no longer pending", task.id)))?;
        let now = (self.now_provider)();
        let session = ActiveSession::start_promoted(task, now).map_err(InfraError::InvalidTaskState)?;
        tracing::info!(
            task_id = session.task_id(),
            remaining = session.remaining_seconds,
            "session promoted"
        );
        let elapsed = session.is_elapsed();
        if !elapsed {
            self.arm(&session).await;
        }
        *slot = Some(session);
        if elapsed {
            let result = self.complete_phase(&mut slot, now).await;
            self.publish(&slot);
            result?;
        } else {
            self.publish(&slot);
        }
        Ok(self.snapshots.borrow().clone())
    }

    /// One countdown step. A failed completion leaves the session at zero so
    /// the next tick retries it.
    pub async fn tick(&self) -> Result<Option<PhaseTransition>, InfraError> {
        if self.is_suspended() {
            return Ok(None);
        }
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            return Ok(None);
        };
        let outcome = session.tick();
        let result = match outcome {
            TickOutcome::Running => Ok(None),
            TickOutcome::PhaseElapsed(_) => {
                let now = (self.now_provider)();
                self.complete_phase(&mut slot, now).await.map(Some)
            }
        };
        self.publish(&slot);
        result
    }

    /// Subtracts the time spent suspended since `suspended_at` and lifts the
    /// tick pause. Reaching zero applies exactly one phase completion.
    pub async fn reconcile(
        &self,
        suspended_at: DateTime<Utc>,
    ) -> Result<Option<PhaseTransition>, InfraError> {
        let mut slot = self.session.lock().await;
        self.suspended.store(false, Ordering::SeqCst);
        let now = (self.now_provider)();
        let Some(session) = slot.as_mut() else {
            return Ok(None);
        };
        let task_id = session.task_id().to_string();
        let before = session.remaining_seconds;
        let outcome = session.reconcile(suspended_at, now);
        tracing::debug!(
            task_id = %task_id,
            before,
            after = session.remaining_seconds,
            "session reconciled"
        );
        let result = match outcome {
            TickOutcome::Running => {
                if session.remaining_seconds != before {
                    self.arm(session).await;
                }
                Ok(None)
            }
            TickOutcome::PhaseElapsed(_) => {
                let result = self.complete_phase(&mut slot, now).await;
                // The alert armed before suspension would still fire later.
                if let Ok(PhaseTransition::Finished(_)) = &result {
                    self.cancel_alert(&task_id).await;
                }
                result.map(Some)
            }
        };
        self.publish(&slot);
        result
    }

    /// Marks `task_id` expired unless it is the running session. Holding the
    /// session lock orders this against `begin_promoted`.
    pub async fn expire_unless_active(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let slot = self.session.lock().await;
        if slot.as_ref().is_some_and(|session| session.task_id() == task_id) {
            return Ok(None);
        }
        self.repository
            .update(task_id, &TaskMutation::MarkExpired)
            .map(Some)
    }

    /// Cancels the pending alert, then discards the session. Task flags are
    /// left untouched.
    pub async fn stop(&self) -> Option<Task> {
        let mut slot = self.session.lock().await;
        let session = slot.as_ref()?;
        self.cancel_alert(session.task_id()).await;
        let stopped = slot.take().map(|session| session.task);
        if let Some(task) = stopped.as_ref() {
            tracing::info!(task_id = %task.id, "session stopped");
        }
        self.publish(&slot);
        stopped
    }

    /// Applies the completion rule to the running task right away.
    pub async fn complete_active(&self) -> Result<Task, InfraError> {
        let mut slot = self.session.lock().await;
        let session = slot
            .as_ref()
            .ok_or_else(|| InfraError::InvalidTaskState("no active session".to_string()))?;
        let updated = self
            .repository
            .update(session.task_id(), &session.task.completion_mutation())?;
        self.cancel_alert(session.task_id()).await;
        *slot = None;
        tracing::info!(task_id = %updated.id, "session completed manually");
        self.publish(&slot);
        Ok(updated)
    }

    /// Ends the session if it belongs to `task_id`, e.g. before deletion.
    pub async fn discard_task(&self, task_id: &str) -> bool {
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_none_or(|session| session.task_id() != task_id) {
            return false;
        }
        self.cancel_alert(task_id).await;
        *slot = None;
        self.publish(&slot);
        true
    }

    /// Picks up edits of the running task without touching its countdown.
    pub async fn refresh_task(&self, task: &Task) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_mut().filter(|session| session.task_id() == task.id) {
            session.task = task.clone();
        }
        self.publish(&slot);
    }

    async fn complete_phase(
        &self,
        slot: &mut Option<ActiveSession>,
        now: DateTime<Utc>,
    ) -> Result<PhaseTransition, InfraError> {
        let Some(session) = slot.as_mut() else {
            return Err(InfraError::InvalidTaskState("no active session".to_string()));
        };
        let task_id = session.task_id().to_string();
        match self.advance(session, now).await {
            Ok(PhaseTransition::Finished(task)) => {
                *slot = None;
                tracing::info!(task_id = %task_id, completed = task.is_completed, "session finished");
                Ok(PhaseTransition::Finished(task))
            }
            Ok(transition) => Ok(transition),
            Err(error) if error.is_repository_failure() => {
                tracing::warn!(task_id = %task_id, %error, "phase completion deferred");
                Err(error)
            }
            Err(error) => {
                tracing::warn!(task_id = %task_id, %error, "session dropped");
                self.cancel_alert(&task_id).await;
                *slot = None;
                Err(error)
            }
        }
    }

    async fn advance(
        &self,
        session: &mut ActiveSession,
        now: DateTime<Utc>,
    ) -> Result<PhaseTransition, InfraError> {
        let task_id = session.task_id().to_string();
        match session.phase {
            SessionPhase::Working if session.task.is_pomodoro => {
                let from = session.task.pomodoro_cycle_count.unwrap_or(0);
                let updated = self
                    .repository
                    .update(&task_id, &TaskMutation::IncrementPomodoroCycle { from })?;
                if updated.is_completed {
                    return Ok(PhaseTransition::Finished(Box::new(updated)));
                }
                let cycle = updated.pomodoro_cycle_count.unwrap_or(0);
                session.task = updated;
                session.begin_break(self.break_seconds.load(Ordering::SeqCst), now);
                self.arm(session).await;
                tracing::info!(task_id = %task_id, cycle, "break started");
                Ok(PhaseTransition::BreakStarted { cycle })
            }
            SessionPhase::Working => {
                let updated = self
                    .repository
                    .update(&task_id, &session.task.completion_mutation())?;
                Ok(PhaseTransition::Finished(Box::new(updated)))
            }
            SessionPhase::OnBreak => {
                session.begin_work(now);
                self.arm(session).await;
                tracing::info!(task_id = %task_id, "work resumed");
                Ok(PhaseTransition::WorkResumed)
            }
        }
    }

    async fn arm(&self, session: &ActiveSession) {
        let message = alert_message(session);
        if let Err(error) = self
            .notifier
            .schedule(session.task_id(), session.remaining_seconds, &message)
            .await
        {
            tracing::warn!(task_id = session.task_id(), %error, "alert not scheduled");
        }
    }

    async fn cancel_alert(&self, task_id: &str) {
        if let Err(error) = self.notifier.cancel(task_id).await {
            tracing::warn!(task_id, %error, "alert not cancelled");
        }
    }

    fn publish(&self, slot: &Option<ActiveSession>) {
        let snapshot = slot
            .as_ref()
            .map(ActiveSession::snapshot)
            .unwrap_or_else(SessionSnapshot::idle);
        self.snapshots.send_replace(snapshot);
    }
}

fn alert_message(session: &ActiveSession) -> String {
    let name = &session.task.name;
    match (session.phase, session.task.is_pomodoro) {
        (SessionPhase::OnBreak, _) => format!("Break time for {name} finished"),
        (SessionPhase::Working, false) => format!("Task time for task {name} finished"),
        (SessionPhase::Working, true) => {
            let cycle = session.task.pomodoro_cycle_count.unwrap_or(0) + 1;
            if cycle >= POMODORO_CYCLES_TO_COMPLETE {
                format!("You have completed the pomodoro cycles for task {name}")
            } else {
                format!("Pomodoro cycle number {cycle} completed")
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionManager")
            .field("break_seconds", &self.break_seconds)
            .finish_non_exhaustive()
    }
}

/// Drives `tick` on a fixed period until `shutdown` flips to true. Each tick
/// counts one second of the session.
pub fn spawn_ticker(
    sessions: Arc<SessionManager>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = sessions.tick().await {
                        tracing::warn!(%error, "tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("ticker stopped");
    })
}
