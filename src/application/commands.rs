use crate::application::active_session::{PhaseTransition, SessionManager};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::clock::{system_now, NowProvider};
use crate::application::scheduler::{ActivationRegistry, ScanReport, Scheduler};
use crate::domain::conflict::check_conflict;
use crate::domain::decomposition::DecompositionTree;
use crate::domain::models::{NewTask, Task, TaskMutation, TaskPatch, TaskStatus};
use crate::domain::session::SessionSnapshot;
use crate::infrastructure::config::{process_env, save_timer_config, EngineConfig, TimerConfig};
use crate::infrastructure::error::{ClashReport, InfraError};
use crate::infrastructure::notifier::{LogNotifier, Notifier};
use crate::infrastructure::task_repository::{PendingFilter, SqliteTaskRepository, TaskRepository};
use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Outcome of a create or edit: the stored task, or the clash that blocked it.
pub type ConflictResult = Result<Task, InfraError>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: Mutex<EngineConfig>,
    repository: Arc<dyn TaskRepository>,
    sessions: Arc<SessionManager>,
    scheduler: Arc<Scheduler>,
    now_provider: NowProvider,
    suspended_at: Mutex<Option<DateTime<Utc>>>,
    task_writes: Mutex<()>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_services(workspace_root, Arc::new(LogNotifier::default()), system_now())
    }

    pub fn with_services(
        workspace_root: PathBuf,
        notifier: Arc<dyn Notifier>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root, process_env)?;
        let config = bootstrap.config;
        let repository: Arc<dyn TaskRepository> =
            Arc::new(SqliteTaskRepository::new(&bootstrap.database_path));
        let sessions = Arc::new(
            SessionManager::new(repository.clone(), notifier.clone(), config.timer.break_seconds)
                .with_now_provider(now_provider.clone()),
        );
        let scheduler = Arc::new(
            Scheduler::new(
                repository.clone(),
                sessions.clone(),
                notifier,
                Arc::new(ActivationRegistry::default()),
            )
            .with_now_provider(now_provider.clone())
            .with_granularity_seconds(config.scheduler.promotion_granularity_seconds),
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config: Mutex::new(config),
            repository,
            sessions,
            scheduler,
            now_provider,
            suspended_at: Mutex::new(None),
            task_writes: Mutex::new(()),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> EngineConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn timezone(&self) -> Tz {
        self.config().app.timezone
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskListFilter {
    #[default]
    All,
    Today,
    ThisWeek,
    Completed,
    Expired,
}

impl TaskListFilter {
    pub fn parse(value: &str) -> Result<Self, InfraError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "today" | "daily" => Ok(Self::Today),
            "this_week" | "weekly" => Ok(Self::ThisWeek),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            other => Err(InfraError::InvalidTaskState(format!(
                "unknown task filter: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportedDecomposition {
    pub tree: DecompositionTree,
    pub task: Task,
}

pub fn create_task_impl(state: &AppState, mut input: NewTask) -> ConflictResult {
    if input.is_pomodoro && input.duration_seconds == 0 {
        input.duration_seconds = state.config().timer.pomodoro_work_seconds;
    }
    let task = Task::from_new(next_id("tsk"), input, state.now())
        .map_err(InfraError::InvalidTaskState)?;

    {
        let _writes = lock_task_writes(state)?;
        ensure_no_conflict(state, &task)?;
        state.repository.insert(&task)?;
    }

    state.log_info("create_task", &format!("created task_id={}", task.id));
    Ok(task)
}

pub async fn edit_task_impl(state: &AppState, task_id: String, patch: TaskPatch) -> ConflictResult {
    let task_id = required_id(&task_id)?;
    let mutation = TaskMutation::Patch(patch);

    let updated = {
        let _writes = lock_task_writes(state)?;
        let mut preview = state
            .repository
            .get(task_id)?
            .ok_or_else(|| InfraError::TaskNotFound(task_id.to_string()))?;
        preview
            .apply(&mutation)
            .map_err(InfraError::InvalidTaskState)?;
        let touches_window = matches!(&mutation, TaskMutation::Patch(patch) if patch.touches_window());
        if touches_window && preview.is_pending() {
            ensure_no_conflict(state, &preview)?;
        }
        state.repository.update(task_id, &mutation)?
    };

    state.sessions.refresh_task(&updated).await;
    state.log_info("edit_task", &format!("updated task_id={task_id}"));
    Ok(updated)
}

/// Cancels the task's alert and session before removing the record.
pub async fn delete_task_impl(state: &AppState, task_id: String) -> Result<bool, InfraError> {
    let task_id = required_id(&task_id)?;
    let was_active = state.sessions.discard_task(task_id).await;
    let removed = state.repository.delete(task_id)?;
    if removed {
        state.log_info(
            "delete_task",
            &format!("deleted task_id={task_id} was_active={was_active}"),
        );
    }
    Ok(removed)
}

pub fn get_task_impl(state: &AppState, task_id: String) -> Result<Task, InfraError> {
    let task_id = required_id(&task_id)?;
    state
        .repository
        .get(task_id)?
        .ok_or_else(|| InfraError::TaskNotFound(task_id.to_string()))
}

pub fn list_tasks_impl(state: &AppState, filter: TaskListFilter) -> Result<Vec<Task>, InfraError> {
    let tasks = state.repository.list_all()?;
    let timezone = state.timezone();
    let today = state.now().with_timezone(&timezone).date_naive();
    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let week_end = week_start + Duration::days(7);

    let local_day = |task: &Task| {
        task.start_time
            .map(|start| start.with_timezone(&timezone).date_naive())
    };
    let selected = tasks
        .into_iter()
        .filter(|task| match filter {
            TaskListFilter::All => true,
            TaskListFilter::Completed => task.status() == TaskStatus::Completed,
            TaskListFilter::Expired => task.status() == TaskStatus::Expired,
            TaskListFilter::Today => {
                task.is_pending() && (task.is_pomodoro || local_day(task) == Some(today))
            }
            TaskListFilter::ThisWeek => {
                task.is_pending()
                    && local_day(task).is_some_and(|day| day >= week_start && day < week_end)
            }
        })
        .collect();
    Ok(selected)
}

pub async fn start_task_impl(state: &AppState, task_id: String) -> Result<SessionSnapshot, InfraError> {
    let task_id = required_id(&task_id)?;
    let snapshot = state.sessions.start_manual(task_id).await?;
    state.log_info("start_task", &format!("started task_id={task_id}"));
    Ok(snapshot)
}

pub async fn stop_task_impl(state: &AppState) -> Result<Option<Task>, InfraError> {
    let stopped = state.sessions.stop().await;
    if let Some(task) = stopped.as_ref() {
        state.log_info("stop_task", &format!("stopped task_id={}", task.id));
    }
    Ok(stopped)
}

pub async fn complete_active_task_impl(state: &AppState) -> Result<Task, InfraError> {
    let completed = state.sessions.complete_active().await?;
    state.log_info("complete_active_task", &format!("completed task_id={}", completed.id));
    Ok(completed)
}

pub async fn current_active_task_impl(state: &AppState) -> Result<Option<Task>, InfraError> {
    Ok(state.sessions.current_task().await)
}

pub async fn session_state_impl(state: &AppState) -> Result<SessionSnapshot, InfraError> {
    Ok(state.sessions.snapshot().await)
}

pub async fn time_remaining_display_impl(state: &AppState) -> Result<String, InfraError> {
    Ok(state.sessions.time_remaining_display().await)
}

/// Records the moment the host process went to the background and pauses the
/// countdown until `resume_impl`.
pub fn suspend_impl(state: &AppState) -> Result<DateTime<Utc>, InfraError> {
    let now = state.now();
    state.sessions.suspend();
    *state
        .suspended_at
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(now);
    state.log_info("suspend", &format!("suspended_at={}", now.to_rfc3339()));
    Ok(now)
}

/// Reconciles the running session against the suspension, then scans.
pub async fn resume_impl(state: &AppState) -> Result<Option<PhaseTransition>, InfraError> {
    let suspended_at = state
        .suspended_at
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let Some(suspended_at) = suspended_at else {
        return Ok(None);
    };

    let transition = state.sessions.reconcile(suspended_at).await?;
    if let Err(error) = state.scheduler.scan().await {
        tracing::warn!(%error, "scan after resume aborted");
    }
    state.log_info(
        "resume",
        &format!("suspended_at={} transition={transition:?}", suspended_at.to_rfc3339()),
    );
    Ok(transition)
}

/// One scan on behalf of a host wake-up that has no scheduler handle.
pub async fn scan_now_impl(state: &AppState) -> Result<ScanReport, InfraError> {
    state.scheduler.scan().await
}

pub fn import_decomposition_impl(
    state: &AppState,
    payload: String,
) -> Result<ImportedDecomposition, InfraError> {
    let tree = DecompositionTree::from_json(next_id("dcp"), &payload)
        .map_err(InfraError::InvalidTaskState)?;
    let task = tree
        .to_pomodoro_task(
            next_id("tsk"),
            state.config().timer.pomodoro_work_seconds,
            state.now(),
        )
        .map_err(InfraError::InvalidTaskState)?;
    state.repository.insert(&task)?;

    state.log_info(
        "import_decomposition",
        &format!("imported group_id={} task_id={} nodes={}", tree.id, task.id, tree.len()),
    );
    Ok(ImportedDecomposition { tree, task })
}

pub fn update_timer_settings_impl(
    state: &AppState,
    pomodoro_work_seconds: u32,
    break_seconds: u32,
) -> Result<TimerConfig, InfraError> {
    let timer = TimerConfig {
        pomodoro_work_seconds,
        break_seconds,
    };
    save_timer_config(&state.config_dir, &timer)?;
    state
        .config
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .timer = timer;
    state.sessions.set_break_seconds(break_seconds);

    state.log_info(
        "update_timer_settings",
        &format!("work={pomodoro_work_seconds}s break={break_seconds}s"),
    );
    Ok(timer)
}

fn ensure_no_conflict(state: &AppState, candidate: &Task) -> Result<(), InfraError> {
    if candidate.is_pomodoro {
        return Ok(());
    }
    let existing = state
        .repository
        .list_pending(&PendingFilter::timed().without_group_children())?;
    match check_conflict(candidate, &existing).map_err(InfraError::InvalidTaskState)? {
        Some(conflict) => Err(InfraError::SchedulingConflict(Box::new(clash_report(
            conflict,
            state.timezone(),
        )))),
        None => Ok(()),
    }
}

fn clash_report(conflict: &Task, timezone: Tz) -> ClashReport {
    let message = match conflict.window() {
        Some(window) => {
            let start = window.start.with_timezone(&timezone);
            let end = window.end.with_timezone(&timezone);
            format!(
                "{} runs from {} to {} on {}. Schedule the task at another time",
                conflict.name,
                start.format("%H:%M"),
                end.format("%H:%M"),
                start.format("%Y-%m-%d")
            )
        }
        None => format!("{} occupies this time. Schedule the task at another time", conflict.name),
    };
    ClashReport {
        task_id: conflict.id.clone(),
        task_name: conflict.name.clone(),
        message,
    }
}

fn required_id(task_id: &str) -> Result<&str, InfraError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(InfraError::InvalidTaskState(
            "task_id must not be empty".to_string(),
        ));
    }
    Ok(task_id)
}

fn lock_task_writes(state: &AppState) -> Result<MutexGuard<'_, ()>, InfraError> {
    state
        .task_writes
        .lock()
        .map_err(|error| InfraError::RepositoryUnavailable(format!("task write lock poisoned: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;
    use crate::domain::models::Priority;
    use crate::domain::session::SessionState;
    use crate::infrastructure::notifier::InMemoryNotifier;
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
        clock: ManualClock,
        notifier: Arc<InMemoryNotifier>,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "focus-scheduler-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self {
                path,
                clock: ManualClock::new(at("2026-02-16T09:00:00Z")),
                notifier: Arc::new(InMemoryNotifier::default()),
            }
        }

        fn app_state(&self) -> AppState {
            AppState::with_services(
                self.path.clone(),
                self.notifier.clone(),
                self.clock.provider(),
            )
            .expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn timed_input(name: &str, start: &str, duration_seconds: u32) -> NewTask {
        NewTask {
            name: name.to_string(),
            duration_seconds,
            start_time: Some(at(start)),
            ..NewTask::default()
        }
    }

    #[test]
    fn create_task_rejects_blank_name() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = create_task_impl(&state, timed_input("   ", "2026-02-16T10:00:00Z", 600));
        assert!(matches!(result, Err(InfraError::InvalidTaskState(_))));
    }

    #[test]
    fn create_and_list_tasks_roundtrip() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let created = create_task_impl(&state, timed_input("Write tests", "2026-02-16T10:00:00Z", 600))
            .expect("create task");
        let listed = list_tasks_impl(&state, TaskListFilter::All).expect("list tasks");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].status(), TaskStatus::Pending);
        assert_eq!(get_task_impl(&state, created.id.clone()).expect("get"), created);
    }

    #[test]
    fn overlapping_create_reports_clash() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let first = create_task_impl(&state, timed_input("Shower", "2026-02-16T10:00:00Z", 600))
            .expect("create first");

        let result = create_task_impl(&state, timed_input("Call", "2026-02-16T10:05:00Z", 600));
        match result {
            Err(InfraError::SchedulingConflict(report)) => {
                assert_eq!(report.task_id, first.id);
                assert_eq!(
                    report.message,
                    "Shower runs from 10:00 to 10:10 on 2026-02-16. Schedule the task at another time"
                );
            }
            other => panic!("expected scheduling conflict, got {other:?}"),
        }
        assert_eq!(list_tasks_impl(&state, TaskListFilter::All).expect("list").len(), 1);

        create_task_impl(&state, timed_input("Call", "2026-02-16T10:10:00Z", 600))
            .expect("adjacent window is accepted");
    }

    #[test]
    fn clash_message_uses_configured_timezone() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        state.config.lock().expect("config lock").app.timezone = chrono_tz::Asia::Tokyo;
        create_task_impl(&state, timed_input("Shower", "2026-02-16T10:00:00Z", 600))
            .expect("create first");
        let result = create_task_impl(&state, timed_input("Call", "2026-02-16T10:05:00Z", 600));
        assert!(matches!(
            result,
            Err(InfraError::SchedulingConflict(report))
                if report.message.starts_with("Shower runs from 19:00 to 19:10 on 2026-02-16")
        ));
    }

    #[tokio::test]
    async fn edit_into_overlap_is_rejected_and_task_unchanged() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        create_task_impl(&state, timed_input("A", "2026-02-16T10:00:00Z", 600)).expect("create a");
        let b = create_task_impl(&state, timed_input("B", "2026-02-16T11:00:00Z", 600))
            .expect("create b");

        let patch = TaskPatch {
            start_time: Some(at("2026-02-16T10:05:00Z")),
            ..TaskPatch::default()
        };
        let result = edit_task_impl(&state, b.id.clone(), patch).await;
        assert!(matches!(result, Err(InfraError::SchedulingConflict(_))));
        assert_eq!(get_task_impl(&state, b.id.clone()).expect("get").start_time, b.start_time);

        let rename = TaskPatch {
            name: Some("B renamed".to_string()),
            priority: Some(Priority::High),
            ..TaskPatch::default()
        };
        let renamed = edit_task_impl(&state, b.id.clone(), rename).await.expect("rename");
        assert_eq!(renamed.name, "B renamed");
        assert_eq!(renamed.priority, Priority::High);
    }

    #[tokio::test]
    async fn edit_of_missing_task_is_not_found() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = edit_task_impl(&state, "missing".to_string(), TaskPatch::default()).await;
        assert!(matches!(result, Err(InfraError::TaskNotFound(_))));
    }

    #[test]
    fn pomodoro_tasks_skip_conflicts_and_use_configured_length() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        create_task_impl(&state, timed_input("A", "2026-02-16T10:00:00Z", 600)).expect("create a");
        let pomodoro = create_task_impl(
            &state,
            NewTask {
                name: "Study".to_string(),
                start_time: Some(at("2026-02-16T10:00:00Z")),
                is_pomodoro: true,
                ..NewTask::default()
            },
        )
        .expect("create pomodoro");
        assert_eq!(pomodoro.duration_seconds, 1500);
        assert_eq!(pomodoro.start_time, None);
        assert_eq!(pomodoro.pomodoro_cycle_count, Some(0));
    }

    #[tokio::test]
    async fn recurring_task_advances_after_ticking_to_zero() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let mut input = timed_input("Stretch", "2026-02-16T09:00:00Z", 60);
        input.is_recurring = true;
        input.repeat_interval_seconds = Some(3600);
        let task = create_task_impl(&state, input).expect("create");

        start_task_impl(&state, task.id.clone()).await.expect("start");
        for _ in 0..60 {
            workspace.clock.advance(1);
            state.sessions().tick().await.expect("tick");
        }

        let stored = get_task_impl(&state, task.id).expect("get");
        assert!(!stored.is_completed);
        assert_eq!(stored.start_time, Some(at("2026-02-16T10:00:00Z")));
        assert!(current_active_task_impl(&state).await.expect("current").is_none());
    }

    #[tokio::test]
    async fn resume_after_long_suspension_force_completes() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create_task_impl(&state, timed_input("Read", "2026-02-16T09:00:00Z", 100))
            .expect("create");
        start_task_impl(&state, task.id.clone()).await.expect("start");
        assert_eq!(time_remaining_display_impl(&state).await.expect("display"), "0:01:40");

        suspend_impl(&state).expect("suspend");
        workspace.clock.advance(150);
        let transition = resume_impl(&state).await.expect("resume");
        assert!(matches!(transition, Some(PhaseTransition::Finished(_))));
        assert!(get_task_impl(&state, task.id).expect("get").is_completed);
        assert_eq!(
            session_state_impl(&state).await.expect("state").state,
            SessionState::Idle
        );

        assert!(resume_impl(&state).await.expect("second resume").is_none());
    }

    #[tokio::test]
    async fn ticks_during_suspension_are_counted_once_on_resume() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create_task_impl(&state, timed_input("Write", "2026-02-16T09:00:00Z", 600))
            .expect("create");
        start_task_impl(&state, task.id).await.expect("start");

        suspend_impl(&state).expect("suspend");
        for _ in 0..10 {
            workspace.clock.advance(1);
            state.sessions().tick().await.expect("tick");
        }
        resume_impl(&state).await.expect("resume");
        assert_eq!(
            session_state_impl(&state).await.expect("state").remaining_seconds,
            590
        );
    }

    #[tokio::test]
    async fn second_start_surfaces_already_active() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let a = create_task_impl(&state, timed_input("A", "2026-02-16T10:00:00Z", 600)).expect("a");
        let b = create_task_impl(&state, timed_input("B", "2026-02-16T11:00:00Z", 600)).expect("b");
        start_task_impl(&state, a.id.clone()).await.expect("start a");
        let result = start_task_impl(&state, b.id).await;
        assert!(matches!(result, Err(InfraError::SessionAlreadyActive(id)) if id == a.id));

        let stopped = stop_task_impl(&state).await.expect("stop");
        assert_eq!(stopped.map(|task| task.id), Some(a.id.clone()));
        assert!(get_task_impl(&state, a.id).expect("get").is_pending());
    }

    #[tokio::test]
    async fn deleting_active_task_cancels_alert_and_session() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create_task_impl(&state, timed_input("A", "2026-02-16T10:00:00Z", 600))
            .expect("create");
        start_task_impl(&state, task.id.clone()).await.expect("start");
        assert!(workspace.notifier.pending_for(&task.id).is_some());

        assert!(delete_task_impl(&state, task.id.clone()).await.expect("delete"));
        assert!(workspace.notifier.pending_for(&task.id).is_none());
        assert!(current_active_task_impl(&state).await.expect("current").is_none());
        assert!(!delete_task_impl(&state, task.id).await.expect("second delete"));
    }

    #[tokio::test]
    async fn complete_active_task_marks_completion() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create_task_impl(&state, timed_input("A", "2026-02-16T10:00:00Z", 600))
            .expect("create");
        start_task_impl(&state, task.id.clone()).await.expect("start");
        let completed = complete_active_task_impl(&state).await.expect("complete");
        assert!(completed.is_completed);
        assert_eq!(
            list_tasks_impl(&state, TaskListFilter::Completed)
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn list_filters_follow_calendar_days() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        // 2026-02-16 is a Monday.
        create_task_impl(&state, timed_input("today", "2026-02-16T12:00:00Z", 600)).expect("today");
        create_task_impl(&state, timed_input("sunday", "2026-02-22T12:00:00Z", 600)).expect("sunday");
        create_task_impl(&state, timed_input("next week", "2026-02-23T12:00:00Z", 600))
            .expect("next week");
        create_task_impl(
            &state,
            NewTask {
                name: "focus".to_string(),
                is_pomodoro: true,
                ..NewTask::default()
            },
        )
        .expect("pomodoro");
        create_task_impl(&state, timed_input("early", "2026-02-16T08:00:00Z", 600)).expect("early");
        scan_now_impl(&state).await.expect("scan");

        let names = |filter| {
            list_tasks_impl(&state, filter)
                .expect("list")
                .into_iter()
                .map(|task| task.name)
                .collect::<Vec<_>>()
        };
        assert_eq!(names(TaskListFilter::Today), vec!["today", "focus"]);
        assert_eq!(names(TaskListFilter::ThisWeek), vec!["today", "sunday"]);
        assert_eq!(names(TaskListFilter::Expired), vec!["early"]);
        assert_eq!(names(TaskListFilter::All).len(), 5);
    }

    #[test]
    fn task_list_filter_accepts_original_view_names() {
        assert_eq!(TaskListFilter::parse("daily").expect("parse"), TaskListFilter::Today);
        assert_eq!(TaskListFilter::parse("weekly").expect("parse"), TaskListFilter::ThisWeek);
        assert!(TaskListFilter::parse("someday").is_err());
    }

    #[test]
    fn import_decomposition_creates_grouped_pomodoro_task() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let payload = r#"{"name": "Plan trip", "subtasks": [{"name": "Book", "details": [{"desc": "Flights"}]}]}"#;
        let imported = import_decomposition_impl(&state, payload.to_string()).expect("import");
        assert_eq!(imported.task.name, "Plan trip");
        assert!(imported.task.is_pomodoro);
        assert_eq!(imported.task.group_id.as_deref(), Some(imported.tree.id.as_str()));
        assert_eq!(imported.tree.len(), 3);
        assert!(get_task_impl(&state, imported.task.id).is_ok());

        assert!(import_decomposition_impl(&state, "{}".to_string()).is_err());
    }

    #[test]
    fn timer_settings_are_validated_and_persisted() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        assert!(update_timer_settings_impl(&state, 60, 300).is_err());
        let timer = update_timer_settings_impl(&state, 1800, 600).expect("update");
        assert_eq!(state.config().timer, timer);

        let reloaded = workspace.app_state();
        assert_eq!(reloaded.config().timer.pomodoro_work_seconds, 1800);
    }

    #[test]
    fn commands_append_json_lines_to_log() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        create_task_impl(&state, timed_input("A", "2026-02-16T10:00:00Z", 600)).expect("create");
        let message = state.command_error("start_task", &InfraError::TaskNotFound("x".to_string()));
        assert_eq!(message, "Task not found: x");

        let log = fs::read_to_string(workspace.path.join("logs").join("commands.log"))
            .expect("read log");
        let lines = log
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json line"))
            .collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["command"], "create_task");
        assert_eq!(lines[1]["level"], "error");
    }
}
