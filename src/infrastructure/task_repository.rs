use crate::domain::models::{Priority, Task, TaskMutation};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const TASK_COLUMNS: &str = "id, name, details, duration_seconds, start_time, priority, is_pomodoro,
    pomodoro_cycle_count, is_completed, is_expired, is_recurring, repeat_interval_seconds,
    group_id, created_at";

/// Narrows `list_pending`. The default matches every pending task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingFilter {
    pub exclude_pomodoro: bool,
    pub exclude_group_children: bool,
    pub priority: Option<Priority>,
}

impl PendingFilter {
    /// Pending tasks that occupy a fixed window.
    pub fn timed() -> Self {
        Self {
            exclude_pomodoro: true,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn without_group_children(mut self) -> Self {
        self.exclude_group_children = true;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        task.is_pending()
            && !(self.exclude_pomodoro && task.is_pomodoro)
            && !(self.exclude_group_children && task.group_id.is_some())
            && self.priority.is_none_or(|priority| task.priority == priority)
    }
}

pub trait TaskRepository: Send + Sync {
    fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<Task>, InfraError>;
    fn list_all(&self) -> Result<Vec<Task>, InfraError>;
    fn get(&self, task_id: &str) -> Result<Option<Task>, InfraError>;
    fn insert(&self, task: &Task) -> Result<(), InfraError>;
    /// Applies one field update atomically and returns the stored result.
    fn update(&self, task_id: &str, mutation: &TaskMutation) -> Result<Task, InfraError>;
    fn delete(&self, task_id: &str) -> Result<bool, InfraError>;
}

fn apply_mutation(mut task: Task, mutation: &TaskMutation) -> Result<Task, InfraError> {
    task.apply(mutation).map_err(InfraError::InvalidTaskState)?;
    Ok(task)
}

fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|left, right| {
        left.start_time
            .is_none()
            .cmp(&right.start_time.is_none())
            .then_with(|| left.start_time.cmp(&right.start_time))
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.id.cmp(&right.id))
    });
}

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(|error| {
            InfraError::RepositoryUnavailable(format!(
                "cannot open {}: {error}",
                self.db_path.display()
            ))
        })
    }
}

struct TaskRow {
    id: String,
    name: String,
    details: Option<String>,
    duration_seconds: u32,
    start_time: Option<String>,
    priority: String,
    is_pomodoro: bool,
    pomodoro_cycle_count: Option<u32>,
    is_completed: bool,
    is_expired: bool,
    is_recurring: bool,
    repeat_interval_seconds: Option<u32>,
    group_id: Option<String>,
    created_at: String,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            details: row.get(2)?,
            duration_seconds: row.get(3)?,
            start_time: row.get(4)?,
            priority: row.get(5)?,
            is_pomodoro: row.get(6)?,
            pomodoro_cycle_count: row.get(7)?,
            is_completed: row.get(8)?,
            is_expired: row.get(9)?,
            is_recurring: row.get(10)?,
            repeat_interval_seconds: row.get(11)?,
            group_id: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    fn into_task(self) -> Result<Task, InfraError> {
        let priority = Priority::parse(&self.priority).ok_or_else(|| {
            InfraError::InvalidTaskState(format!(
                "task {} has unknown priority '{}'",
                self.id, self.priority
            ))
        })?;
        let start_time = self
            .start_time
            .as_deref()
            .map(|raw| parse_timestamp(raw, &self.id))
            .transpose()?;
        let created_at = parse_timestamp(&self.created_at, &self.id)?;
        Ok(Task {
            id: self.id,
            name: self.name,
            details: self.details,
            duration_seconds: self.duration_seconds,
            start_time,
            priority,
            is_pomodoro: self.is_pomodoro,
            pomodoro_cycle_count: self.pomodoro_cycle_count,
            is_completed: self.is_completed,
            is_expired: self.is_expired,
            is_recurring: self.is_recurring,
            repeat_interval_seconds: self.repeat_interval_seconds,
            group_id: self.group_id,
            created_at,
        })
    }
}

fn parse_timestamp(raw: &str, task_id: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::InvalidTaskState(format!("task {task_id} has invalid timestamp '{raw}': {error}"))
        })
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_tasks(
    connection: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Task>, InfraError> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement
        .query_map(params, TaskRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

fn select_task(connection: &Connection, task_id: &str) -> Result<Option<Task>, InfraError> {
    let row = connection
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![task_id],
            TaskRow::read,
        )
        .optional()?;
    row.map(TaskRow::into_task).transpose()
}

impl TaskRepository for SqliteTaskRepository {
    fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<Task>, InfraError> {
        let connection = self.connect()?;
        let mut sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE is_completed = 0 AND is_expired = 0"
        );
        if filter.exclude_pomodoro {
            sql.push_str(" AND is_pomodoro = 0");
        }
        if filter.exclude_group_children {
            sql.push_str(" AND group_id IS NULL");
        }
        sql.push_str(" AND (?1 IS NULL OR priority = ?1)");
        sql.push_str(" ORDER BY start_time IS NULL, start_time, created_at, id");
        query_tasks(
            &connection,
            &sql,
            params![filter.priority.map(Priority::as_str)],
        )
    }

    fn list_all(&self) -> Result<Vec<Task>, InfraError> {
        let connection = self.connect()?;
        query_tasks(
            &connection,
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks ORDER BY start_time IS NULL, start_time, created_at, id"
            ),
            [],
        )
    }

    fn get(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let connection = self.connect()?;
        select_task(&connection, task_id)
    }

    fn insert(&self, task: &Task) -> Result<(), InfraError> {
        task.validate().map_err(InfraError::InvalidTaskState)?;
        let connection = self.connect()?;
        connection.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                task.id,
                task.name,
                task.details,
                task.duration_seconds,
                task.start_time.map(format_timestamp),
                task.priority.as_str(),
                task.is_pomodoro,
                task.pomodoro_cycle_count,
                task.is_completed,
                task.is_expired,
                task.is_recurring,
                task.repeat_interval_seconds,
                task.group_id,
                format_timestamp(task.created_at),
            ],
        )?;
        Ok(())
    }

    fn update(&self, task_id: &str, mutation: &TaskMutation) -> Result<Task, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let current = select_task(&transaction, task_id)?
            .ok_or_else(|| InfraError::TaskNotFound(task_id.to_string()))?;
        let updated = apply_mutation(current, mutation)?;
        transaction.execute(
            "UPDATE tasks SET
               name = ?2,
               details = ?3,
               duration_seconds = ?4,
               start_time = ?5,
               priority = ?6,
               pomodoro_cycle_count = ?7,
               is_completed = ?8,
               is_expired = ?9,
               is_recurring = ?10,
               repeat_interval_seconds = ?11
             WHERE id = ?1",
            params![
                updated.id,
                updated.name,
                updated.details,
                updated.duration_seconds,
                updated.start_time.map(format_timestamp),
                updated.priority.as_str(),
                updated.pomodoro_cycle_count,
                updated.is_completed,
                updated.is_expired,
                updated.is_recurring,
                updated.repeat_interval_seconds,
            ],
        )?;
        transaction.commit()?;
        Ok(updated)
    }

    fn delete(&self, task_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(removed > 0)
    }
}

/// Process-local store. Availability and per-task write failures can be
/// toggled to exercise the scheduler's failure handling.
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<String, Task>>,
    unavailable: AtomicBool,
    failing_updates: Mutex<HashSet<String>>,
}

impl InMemoryTaskRepository {
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn fail_updates_for(&self, task_id: &str) {
        if let Ok(mut failing) = self.failing_updates.lock() {
            failing.insert(task_id.to_string());
        }
    }

    pub fn clear_update_failures(&self) {
        if let Ok(mut failing) = self.failing_updates.lock() {
            failing.clear();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Task>>, InfraError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InfraError::RepositoryUnavailable(
                "task store is offline".to_string(),
            ));
        }
        self.tasks
            .lock()
            .map_err(|error| InfraError::RepositoryUnavailable(format!("task store lock poisoned: {error}")))
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<Task>, InfraError> {
        let tasks = self.lock()?;
        let mut pending = tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect::<Vec<_>>();
        sort_tasks(&mut pending);
        Ok(pending)
    }

    fn list_all(&self) -> Result<Vec<Task>, InfraError> {
        let tasks = self.lock()?;
        let mut all = tasks.values().cloned().collect::<Vec<_>>();
        sort_tasks(&mut all);
        Ok(all)
    }

    fn get(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let tasks = self.lock()?;
        Ok(tasks.get(task_id).cloned())
    }

    fn insert(&self, task: &Task) -> Result<(), InfraError> {
        task.validate().map_err(InfraError::InvalidTaskState)?;
        let mut tasks = self.lock()?;
        if tasks.contains_key(&task.id) {
            return Err(InfraError::InvalidTaskState(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn update(&self, task_id: &str, mutation: &TaskMutation) -> Result<Task, InfraError> {
        let failing = self
            .failing_updates
            .lock()
            .map(|failing| failing.contains(task_id))
            .unwrap_or(false);
        if failing {
            return Err(InfraError::RepositoryUnavailable(format!(
                "write rejected for task {task_id}"
            )));
        }

        let mut tasks = self.lock()?;
        let current = tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| InfraError::TaskNotFound(task_id.to_string()))?;
        let updated = apply_mutation(current, mutation)?;
        tasks.insert(task_id.to_string(), updated.clone());
        Ok(updated)
    }

    fn delete(&self, task_id: &str) -> Result<bool, InfraError> {
        let mut tasks = self.lock()?;
        Ok(tasks.remove(task_id).is_some())
    }
}
