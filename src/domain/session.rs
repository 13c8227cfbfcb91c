//! Countdown state machine for the single running task.
//!
//! `Idle` is the absence of an [`ActiveSession`]; a session enters in
//! `Working`, may alternate with `OnBreak` for Pomodoro tasks, and is
//! dropped by its owner when it finishes. Nothing here performs I/O: the
//! owner applies repository and notifier effects when a phase elapses.

use crate::domain::models::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Working,
    OnBreak,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartOrigin {
    Manual,
    Promoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    /// The countdown of this phase reached zero.
    PhaseElapsed(SessionPhase),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub task: Task,
    pub phase: SessionPhase,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub started_at_wall_clock: DateTime<Utc>,
    pub origin: StartOrigin,
    /// Wall-clock instant up to which suspended time has been subtracted.
    pub reconciled_through: Option<DateTime<Utc>>,
}

impl ActiveSession {
    /// User-initiated start: the full duration is always granted.
    pub fn start_manual(task: Task, now: DateTime<Utc>) -> Result<Self, String> {
        ensure_startable(&task)?;
        let total = task.duration_seconds;
        Ok(Self::working(task, total, now, StartOrigin::Manual))
    }

    /// Scheduler-initiated start. A task whose start time has already passed
    /// only gets what is left of its original window, never less than zero.
    pub fn start_promoted(task: Task, now: DateTime<Utc>) -> Result<Self, String> {
        ensure_startable(&task)?;
        let elapsed = task
            .start_time
            .map(|start| (now - start).num_seconds().max(0))
            .unwrap_or(0);
        let remaining = (i64::from(task.duration_seconds) - elapsed).max(0);
        let remaining = u32::try_from(remaining).unwrap_or(0);
        Ok(Self::working(task, remaining, now, StartOrigin::Promoted))
    }

    fn working(task: Task, seconds: u32, now: DateTime<Utc>, origin: StartOrigin) -> Self {
        Self {
            task,
            phase: SessionPhase::Working,
            remaining_seconds: seconds,
            total_seconds: seconds,
            started_at_wall_clock: now,
            origin,
            reconciled_through: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn is_elapsed(&self) -> bool {
        self.remaining_seconds == 0
    }

    pub fn progress(&self) -> f64 {
        if self.total_seconds == 0 {
            return 0.0;
        }
        (f64::from(self.remaining_seconds) / f64::from(self.total_seconds)).clamp(0.0, 1.0)
    }

    pub fn tick(&mut self) -> TickOutcome {
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        self.outcome()
    }

    /// Subtracts the time spent suspended since `suspended_at`.
    ///
    /// Time already accounted by an earlier call is never subtracted again,
    /// so repeating a call with the same inputs leaves the countdown as is.
    pub fn reconcile(&mut self, suspended_at: DateTime<Utc>, now: DateTime<Utc>) -> TickOutcome {
        let mut from = suspended_at.max(self.started_at_wall_clock);
        if let Some(reconciled) = self.reconciled_through {
            from = from.max(reconciled);
        }
        if now <= from {
            return self.outcome();
        }

        let elapsed = (now - from).num_seconds();
        self.reconciled_through = Some(now);
        if i64::from(self.remaining_seconds) - elapsed <= 0 {
            self.remaining_seconds = 0;
        } else {
            self.remaining_seconds -= elapsed as u32;
        }
        self.outcome()
    }

    pub fn begin_break(&mut self, break_seconds: u32, now: DateTime<Utc>) {
        self.enter_phase(SessionPhase::OnBreak, break_seconds, now);
    }

    pub fn begin_work(&mut self, now: DateTime<Utc>) {
        let duration = self.task.duration_seconds;
        self.enter_phase(SessionPhase::Working, duration, now);
    }

    fn enter_phase(&mut self, phase: SessionPhase, seconds: u32, now: DateTime<Utc>) {
        self.phase = phase;
        self.remaining_seconds = seconds;
        self.total_seconds = seconds;
        self.started_at_wall_clock = now;
        self.reconciled_through = None;
    }

    fn outcome(&self) -> TickOutcome {
        if self.is_elapsed() {
            TickOutcome::PhaseElapsed(self.phase)
        } else {
            TickOutcome::Running
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: match self.phase {
                SessionPhase::Working => SessionState::Working,
                SessionPhase::OnBreak => SessionState::OnBreak,
            },
            task_id: Some(self.task.id.clone()),
            task_name: Some(self.task.name.clone()),
            remaining_seconds: self.remaining_seconds,
            total_seconds: self.total_seconds,
            progress: self.progress(),
            display: format_hms(self.remaining_seconds),
            pomodoro_cycle_count: self.task.pomodoro_cycle_count,
            started_at: Some(self.started_at_wall_clock),
        }
    }
}

fn ensure_startable(task: &Task) -> Result<(), String> {
    if !task.is_pending() {
        return Err(format!("task {} is no longer pending", task.id));
    }
    if !task.is_pomodoro && task.start_time.is_none() {
        return Err(format!("task {} has no start time", task.id));
    }
    if task.duration_seconds == 0 {
        return Err(format!("task {} has no duration", task.id));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Working,
    OnBreak,
}

/// What subscribers see of the session after every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub task_id: Option<String>,
    pub task_name: Option<String>,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub progress: f64,
    pub display: String,
    pub pomodoro_cycle_count: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            task_id: None,
            task_name: None,
            remaining_seconds: 0,
            total_seconds: 0,
            progress: 1.0,
            display: format_hms(0),
            pomodoro_cycle_count: None,
            started_at: None,
        }
    }
}

/// `H:MM:SS`, hours unpadded.
pub fn format_hms(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds / 60) % 60;
    let seconds = seconds % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}
