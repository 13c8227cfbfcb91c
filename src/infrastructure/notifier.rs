use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Local alert delivery. At most one alert is pending per task id; scheduling
/// again for the same id replaces the earlier request.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn schedule(
        &self,
        task_id: &str,
        fire_after_seconds: u32,
        message: &str,
    ) -> Result<(), InfraError>;

    async fn cancel(&self, task_id: &str) -> Result<(), InfraError>;

    async fn fire_now(&self, message: &str) -> Result<(), InfraError>;
}

type AlertTable = HashMap<String, (u64, JoinHandle<()>)>;

/// Delivers alerts to the tracing output. Used by the headless binary.
/// Entries carry a generation so a fired alert removes only itself, never a
/// replacement scheduled under the same id.
#[derive(Debug, Default)]
pub struct LogNotifier {
    pending: Arc<Mutex<AlertTable>>,
    generation: AtomicU64,
}

impl LogNotifier {
    fn lock(&self) -> Result<MutexGuard<'_, AlertTable>, InfraError> {
        self.pending
            .lock()
            .map_err(|error| InfraError::NotificationFailed(format!("alert table lock poisoned: {error}")))
    }

    pub fn pending_count(&self) -> usize {
        self.lock().map(|pending| pending.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn schedule(
        &self,
        task_id: &str,
        fire_after_seconds: u32,
        message: &str,
    ) -> Result<(), InfraError> {
        let owned_id = task_id.to_string();
        let message = message.to_string();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let table = Arc::clone(&self.pending);
        let mut pending = self.lock()?;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(fire_after_seconds))).await;
            tracing::info!(task_id = %owned_id, "{message}");
            if let Ok(mut pending) = table.lock() {
                if pending.get(&owned_id).is_some_and(|(current, _)| *current == generation) {
                    pending.remove(&owned_id);
                }
            }
        });
        if let Some((_, previous)) = pending.insert(task_id.to_string(), (generation, handle)) {
            previous.abort();
        }
        drop(pending);
        tracing::debug!(task_id, fire_after_seconds, "alert scheduled");
        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> Result<(), InfraError> {
        if let Some((_, handle)) = self.lock()?.remove(task_id) {
            handle.abort();
            tracing::debug!(task_id, "alert cancelled");
        }
        Ok(())
    }

    async fn fire_now(&self, message: &str) -> Result<(), InfraError> {
        tracing::info!("{message}");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierRequest {
    Scheduled {
        task_id: String,
        fire_after_seconds: u32,
        message: String,
    },
    Cancelled {
        task_id: String,
    },
    Fired {
        message: String,
    },
}

/// Records every request. Can be switched into a failing mode, in which
/// requests are still recorded but reported as undelivered.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    requests: Mutex<Vec<NotifierRequest>>,
    failing: AtomicBool,
}

impl InMemoryNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<NotifierRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Messages passed to `fire_now`, oldest first.
    pub fn fired(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                NotifierRequest::Fired { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// The alert still armed for `task_id`, if any.
    pub fn pending_for(&self, task_id: &str) -> Option<(u32, String)> {
        let mut pending = None;
        for request in self.requests() {
            match request {
                NotifierRequest::Scheduled {
                    task_id: id,
                    fire_after_seconds,
                    message,
                } if id == task_id => pending = Some((fire_after_seconds, message)),
                NotifierRequest::Cancelled { task_id: id } if id == task_id => pending = None,
                _ => {}
            }
        }
        pending
    }

    fn record(&self, request: NotifierRequest) -> Result<(), InfraError> {
        self.requests
            .lock()
            .map_err(|error| InfraError::NotificationFailed(format!("request log lock poisoned: {error}")))?
            .push(request);
        if self.failing.load(Ordering::SeqCst) {
            return Err(InfraError::NotificationFailed(
                "notifier is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn schedule(
        &self,
        task_id: &str,
        fire_after_seconds: u32,
        message: &str,
    ) -> Result<(), InfraError> {
        self.record(NotifierRequest::Scheduled {
            task_id: task_id.to_string(),
            fire_after_seconds,
            message: message.to_string(),
        })
    }

    async fn cancel(&self, task_id: &str) -> Result<(), InfraError> {
        self.record(NotifierRequest::Cancelled {
            task_id: task_id.to_string(),
        })
    }

    async fn fire_now(&self, message: &str) -> Result<(), InfraError> {
        self.record(NotifierRequest::Fired {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_notifier_tracks_pending_alert() {
        let notifier = InMemoryNotifier::default();
        notifier.schedule("t1", 1500, "done").await.expect("schedule");
        assert_eq!(notifier.pending_for("t1"), Some((1500, "done".to_string())));

        notifier.schedule("t1", 300, "break").await.expect("re-arm");
        assert_eq!(notifier.pending_for("t1"), Some((300, "break".to_string())));

        notifier.cancel("t1").await.expect("cancel");
        assert_eq!(notifier.pending_for("t1"), None);
    }

    #[tokio::test]
    async fn failing_notifier_still_records_requests() {
        let notifier = InMemoryNotifier::default();
        notifier.set_failing(true);
        assert!(notifier.fire_now("hello").await.is_err());
        assert_eq!(notifier.fired(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn log_notifier_replaces_and_cancels_alerts() {
        let notifier = LogNotifier::default();
        notifier.schedule("t1", 60, "first").await.expect("schedule");
        notifier.schedule("t1", 60, "second").await.expect("replace");
        assert_eq!(notifier.pending_count(), 1);
        notifier.cancel("t1").await.expect("cancel");
        assert_eq!(notifier.pending_count(), 0);
        notifier.fire_now("now").await.expect("fire");
    }

    #[tokio::test]
    async fn log_notifier_forgets_alerts_once_fired() {
        let notifier = LogNotifier::default();
        notifier.schedule("t1", 0, "due").await.expect("schedule");
        notifier.schedule("t2", 60, "later").await.expect("schedule");

        tokio::time::timeout(Duration::from_secs(5), async {
            while notifier.pending_count() > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fired alert removed");
        assert!(notifier.lock().expect("lock").contains_key("t2"));
    }
}
