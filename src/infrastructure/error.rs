use thiserror::Error;

/// Details of a rejected create/edit, surfaced to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClashReport {
    pub task_id: String,
    pub task_name: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Task repository unavailable: {0}")]
    RepositoryUnavailable(String),
    #[error("Task is clashing with {}: {}", .0.task_name, .0.message)]
    SchedulingConflict(Box<ClashReport>),
    #[error("Invalid task state: {0}")]
    InvalidTaskState(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("A session is already active for task {0}")]
    SessionAlreadyActive(String),
    #[error("Notification failed: {0}")]
    NotificationFailed(String),
}

impl InfraError {
    /// Failures that abort a scan or tick and are retried on the next period.
    pub fn is_repository_failure(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::RepositoryUnavailable(_))
    }
}
