use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Completing this many work intervals finishes a Pomodoro task.
pub const POMODORO_CYCLES_TO_COMPLETE: u32 = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Expired,
}

/// Closed-open `[start, end)` interval a non-Pomodoro task occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TaskWindow {
    pub fn new(start: DateTime<Utc>, duration_seconds: u32) -> Self {
        Self {
            start,
            end: start + Duration::seconds(i64::from(duration_seconds)),
        }
    }

    pub fn overlaps(&self, other: &TaskWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub details: Option<String>,
    pub duration_seconds: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub is_pomodoro: bool,
    pub pomodoro_cycle_count: Option<u32>,
    pub is_completed: bool,
    pub is_expired: bool,
    pub is_recurring: bool,
    pub repeat_interval_seconds: Option<u32>,
    pub group_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when creating a task. Pomodoro inputs drop any start time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub details: Option<String>,
    pub duration_seconds: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub is_pomodoro: bool,
    pub is_recurring: bool,
    pub repeat_interval_seconds: Option<u32>,
    pub group_id: Option<String>,
}

/// Partial edit. `details: Some("")` clears the details.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub details: Option<String>,
    pub duration_seconds: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub is_recurring: Option<bool>,
    pub repeat_interval_seconds: Option<u32>,
}

impl TaskPatch {
    pub fn touches_window(&self) -> bool {
        self.duration_seconds.is_some() || self.start_time.is_some()
    }
}

/// Single-task field update applied atomically by a repository.
///
/// Every variant is idempotent: the guarded variants carry the value they
/// expect to move away from and do nothing when it has already moved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskMutation {
    MarkExpired,
    MarkCompleted,
    AdvanceRecurrence { from: DateTime<Utc> },
    IncrementPomodoroCycle { from: u32 },
    Patch(TaskPatch),
}

impl Task {
    pub fn from_new(id: String, input: NewTask, created_at: DateTime<Utc>) -> Result<Self, String> {
        let is_pomodoro = input.is_pomodoro;
        let task = Self {
            id,
            name: input.name.trim().to_string(),
            details: normalize_details(input.details.as_deref()),
            duration_seconds: input.duration_seconds,
            start_time: if is_pomodoro { None } else { input.start_time },
            priority: input.priority.unwrap_or(Priority::Low),
            is_pomodoro,
            pomodoro_cycle_count: is_pomodoro.then_some(0),
            is_completed: false,
            is_expired: false,
            is_recurring: input.is_recurring,
            repeat_interval_seconds: if input.is_recurring {
                input.repeat_interval_seconds
            } else {
                None
            },
            group_id: input
                .group_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            created_at,
        };
        task.validate()?;
        Ok(task)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.name, "task.name")?;
        if self.is_completed && self.is_expired {
            return Err("task cannot be both completed and expired".to_string());
        }
        if self.duration_seconds == 0 {
            return Err("task.duration must be greater than zero".to_string());
        }
        if self.is_pomodoro {
            if self.start_time.is_some() {
                return Err("pomodoro tasks do not carry a start time".to_string());
            }
            if self.is_recurring {
                return Err("pomodoro tasks cannot be recurring".to_string());
            }
            match self.pomodoro_cycle_count {
                Some(count) if count <= POMODORO_CYCLES_TO_COMPLETE => {}
                Some(_) => {
                    return Err(format!(
                        "task.pomodoro_cycle_count must be <= {POMODORO_CYCLES_TO_COMPLETE}"
                    ));
                }
                None => return Err("pomodoro tasks require a cycle count".to_string()),
            }
        } else {
            if self.start_time.is_none() {
                return Err("task.start_time is required for timed tasks".to_string());
            }
            if self.pomodoro_cycle_count.is_some() {
                return Err("task.pomodoro_cycle_count is only valid for pomodoro tasks".to_string());
            }
        }
        if self.is_recurring && self.repeat_interval_seconds.unwrap_or(0) == 0 {
            return Err("recurring tasks require a repeat interval greater than zero".to_string());
        }
        Ok(())
    }

    pub fn status(&self) -> TaskStatus {
        if self.is_completed {
            TaskStatus::Completed
        } else if self.is_expired {
            TaskStatus::Expired
        } else {
            TaskStatus::Pending
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == TaskStatus::Pending
    }

    pub fn window(&self) -> Option<TaskWindow> {
        if self.is_pomodoro {
            return None;
        }
        self.start_time
            .map(|start| TaskWindow::new(start, self.duration_seconds))
    }

    /// The `completeTask` rule: recurring tasks move forward, others finish.
    pub fn completion_mutation(&self) -> TaskMutation {
        match (self.is_recurring, self.repeat_interval_seconds, self.start_time) {
            (true, Some(interval), Some(from)) if interval > 0 && !self.is_pomodoro => {
                TaskMutation::AdvanceRecurrence { from }
            }
            _ => TaskMutation::MarkCompleted,
        }
    }

    pub fn apply(&mut self, mutation: &TaskMutation) -> Result<(), String> {
        match mutation {
            TaskMutation::MarkExpired => {
                if self.is_pomodoro {
                    return Err("pomodoro tasks never expire".to_string());
                }
                if self.is_pending() {
                    self.is_expired = true;
                }
            }
            TaskMutation::MarkCompleted => {
                if self.is_pending() {
                    self.is_completed = true;
                }
            }
            TaskMutation::AdvanceRecurrence { from } => {
                let interval = self
                    .repeat_interval_seconds
                    .filter(|value| *value > 0)
                    .ok_or_else(|| "task is not recurring".to_string())?;
                if self.is_pending() && self.start_time == Some(*from) {
                    self.start_time = Some(*from + Duration::seconds(i64::from(interval)));
                }
            }
            TaskMutation::IncrementPomodoroCycle { from } => {
                if !self.is_pomodoro {
                    return Err("only pomodoro tasks count cycles".to_string());
                }
                let current = self.pomodoro_cycle_count.unwrap_or(0);
                if self.is_pending() && current == *from && current < POMODORO_CYCLES_TO_COMPLETE {
                    let next = current + 1;
                    self.pomodoro_cycle_count = Some(next);
                    if next >= POMODORO_CYCLES_TO_COMPLETE {
                        self.is_completed = true;
                    }
                }
            }
            TaskMutation::Patch(patch) => self.apply_patch(patch)?,
        }
        self.validate()
    }

    fn apply_patch(&mut self, patch: &TaskPatch) -> Result<(), String> {
        if let Some(name) = patch.name.as_deref() {
            self.name = name.trim().to_string();
        }
        if let Some(details) = patch.details.as_deref() {
            self.details = normalize_details(Some(details));
        }
        if let Some(duration) = patch.duration_seconds {
            self.duration_seconds = duration;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(start_time) = patch.start_time {
            if self.is_pomodoro {
                return Err("pomodoro tasks do not carry a start time".to_string());
            }
            if !self.is_pending() {
                return Err("start time can only change while the task is pending".to_string());
            }
            self.start_time = Some(start_time);
        }
        if let Some(is_recurring) = patch.is_recurring {
            self.is_recurring = is_recurring;
            if !is_recurring {
                self.repeat_interval_seconds = None;
            }
        }
        if let Some(interval) = patch.repeat_interval_seconds {
            if self.is_recurring {
                self.repeat_interval_seconds = Some(interval);
            }
        }
        Ok(())
    }
}

fn normalize_details(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_task() -> Task {
        Task {
            id: "tsk-1".to_string(),
            name: "Shower".to_string(),
            details: Some("put the shampoo back".to_string()),
            duration_seconds: 600,
            start_time: Some(fixed_time("2026-02-16T10:00:00Z")),
            priority: Priority::High,
            is_pomodoro: false,
            pomodoro_cycle_count: None,
            is_completed: false,
            is_expired: false,
            is_recurring: false,
            repeat_interval_seconds: None,
            group_id: None,
            created_at: fixed_time("2026-02-16T08:00:00Z"),
        }
    }

    fn sample_pomodoro() -> Task {
        Task {
            id: "tsk-2".to_string(),
            name: "Work on assignment".to_string(),
            details: None,
            duration_seconds: 1500,
            start_time: None,
            priority: Priority::Medium,
            is_pomodoro: true,
            pomodoro_cycle_count: Some(0),
            is_completed: false,
            is_expired: false,
            is_recurring: false,
            repeat_interval_seconds: None,
            group_id: None,
            created_at: fixed_time("2026-02-16T08:00:00Z"),
        }
    }

    #[test]
    fn task_validate_accepts_valid_tasks() {
        assert!(sample_task().validate().is_ok());
        assert!(sample_pomodoro().validate().is_ok());
    }

    #[test]
    fn task_validate_rejects_blank_name_and_missing_start() {
        let mut task = sample_task();
        task.name = "  ".to_string();
        assert!(task.validate().is_err());

        let mut task = sample_task();
        task.start_time = None;
        assert!(task.validate().is_err());
    }

    #[test]
    fn task_validate_rejects_both_terminal_flags() {
        let mut task = sample_task();
        task.is_completed = true;
        task.is_expired = true;
        assert!(task.validate().is_err());
    }

    #[test]
    fn from_new_drops_start_for_pomodoro_and_seeds_counter() {
        let task = Task::from_new(
            "tsk-9".to_string(),
            NewTask {
                name: " Read ".to_string(),
                duration_seconds: 1500,
                start_time: Some(fixed_time("2026-02-16T10:00:00Z")),
                is_pomodoro: true,
                ..NewTask::default()
            },
            fixed_time("2026-02-16T08:00:00Z"),
        )
        .expect("valid pomodoro");
        assert_eq!(task.name, "Read");
        assert_eq!(task.start_time, None);
        assert_eq!(task.pomodoro_cycle_count, Some(0));
        assert_eq!(task.priority, Priority::Low);
    }

    #[test]
    fn recurring_requires_interval() {
        let result = Task::from_new(
            "tsk-9".to_string(),
            NewTask {
                name: "Stretch".to_string(),
                duration_seconds: 60,
                start_time: Some(fixed_time("2026-02-16T10:00:00Z")),
                is_recurring: true,
                ..NewTask::default()
            },
            fixed_time("2026-02-16T08:00:00Z"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn windows_use_closed_open_intersection() {
        let a = TaskWindow::new(fixed_time("2026-02-16T10:00:00Z"), 600);
        let b = TaskWindow::new(fixed_time("2026-02-16T10:05:00Z"), 600);
        let adjacent = TaskWindow::new(fixed_time("2026-02-16T10:10:00Z"), 600);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&adjacent));
    }

    #[test]
    fn completion_advances_recurring_task_once() {
        let mut task = sample_task();
        task.duration_seconds = 60;
        task.is_recurring = true;
        task.repeat_interval_seconds = Some(3600);
        let before = task.start_time.expect("start");

        let mutation = task.completion_mutation();
        task.apply(&mutation).expect("advance");
        task.apply(&mutation).expect("second apply is a no-op");

        assert!(!task.is_completed);
        assert_eq!(task.start_time, Some(before + Duration::seconds(3600)));
    }

    #[test]
    fn completion_marks_one_shot_task_completed() {
        let mut task = sample_task();
        task.apply(&task.completion_mutation()).expect("complete");
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn expiry_is_ignored_for_terminal_tasks() {
        let mut task = sample_task();
        task.apply(&TaskMutation::MarkCompleted).expect("complete");
        task.apply(&TaskMutation::MarkExpired).expect("no-op");
        assert!(task.is_completed);
        assert!(!task.is_expired);
    }

    #[test]
    fn pomodoro_rejects_expiry() {
        let mut task = sample_pomodoro();
        assert!(task.apply(&TaskMutation::MarkExpired).is_err());
    }

    #[test]
    fn patch_cannot_move_start_of_finished_task() {
        let mut task = sample_task();
        task.is_expired = true;
        let patch = TaskPatch {
            start_time: Some(fixed_time("2026-02-17T10:00:00Z")),
            ..TaskPatch::default()
        };
        assert!(task.apply(&TaskMutation::Patch(patch)).is_err());
    }

    fn mutation_strategy() -> impl Strategy<Value = TaskMutation> {
        prop_oneof![
            Just(TaskMutation::MarkExpired),
            Just(TaskMutation::MarkCompleted),
            (0u32..6).prop_map(|from| TaskMutation::IncrementPomodoroCycle { from }),
        ]
    }

    proptest! {
        #[test]
        fn terminal_flags_stay_exclusive(mutations in proptest::collection::vec(mutation_strategy(), 0..12)) {
            let mut task = sample_task();
            for mutation in &mutations {
                let _ = task.apply(mutation);
                prop_assert!(!(task.is_completed && task.is_expired));
            }
        }

        #[test]
        fn pomodoro_counter_never_passes_completion(extra in 0u32..8) {
            let mut task = sample_pomodoro();
            for _ in 0..(POMODORO_CYCLES_TO_COMPLETE + extra) {
                let from = task.pomodoro_cycle_count.unwrap_or(0);
                task.apply(&TaskMutation::IncrementPomodoroCycle { from }).expect("increment");
            }
            prop_assert!(task.is_completed);
            prop_assert_eq!(task.pomodoro_cycle_count, Some(POMODORO_CYCLES_TO_COMPLETE));
        }
    }

    #[test]
    fn task_supports_serde_roundtrip() {
        let task = sample_task();
        let roundtrip: Task =
            serde_json::from_str(&serde_json::to_string(&task).expect("serialize task"))
                .expect("deserialize task");
        assert_eq!(roundtrip, task);
    }
}
