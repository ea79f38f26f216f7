use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sink::ProgressSink;
use crate::status::{TaskState, TaskStatus};

const DEFAULT_PROGRESS_BUFFER: usize = 64;

/// Error type of a task body.
///
/// The manager needs to produce the body's own error when it classifies a task
/// as cancelled or when the body panics.
pub trait TaskFailure: Clone + Send + Sync + 'static {
    fn cancelled() -> Self;
    fn panicked(message: String) -> Self;
}

/// Handle given to a task body.
pub struct TaskContext<P> {
    id: String,
    cancel: CancellationToken,
    progress: ProgressSink<P>,
}

impl<P> TaskContext<P> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> &ProgressSink<P> {
        &self.progress
    }
}

struct TaskRecord<P, E> {
    status: TaskStatus<P, E>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

type Registry<P, E> = Arc<RwLock<HashMap<String, TaskRecord<P, E>>>>;

/// Registry of background tasks.
///
/// Construct one per application and share it by reference. Every status read
/// and write goes through the same lock, so callers never observe a half-updated
/// record.
pub struct TaskManager<P, E> {
    runtime: Handle,
    tasks: Registry<P, E>,
    counter: AtomicU64,
    progress_buffer: usize,
}

impl<P, E> TaskManager<P, E>
where
    P: Clone + Send + Sync + 'static,
    E: TaskFailure,
{
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            counter: AtomicU64::new(0),
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
        }
    }

    /// Capacity of each task's progress queue.
    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity.max(1);
        self
    }

    /// Register and launch a task. Returns its id, `"{name}-{n}"`, immediately.
    pub fn start_task<F, Fut>(&self, name: &str, task: F) -> String
    where
        F: FnOnce(TaskContext<P>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        let id = format!("{name}-{}", self.counter.fetch_add(1, Ordering::Relaxed) + 1);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let (progress, mut updates) = ProgressSink::channel(self.progress_buffer);

        write(&self.tasks).insert(
            id.clone(),
            TaskRecord {
                status: TaskStatus::running(&id),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        info!(task_id = %id, "task started");

        let listener = {
            let tasks = Arc::clone(&self.tasks);
            let id = id.clone();
            self.runtime.spawn(async move {
                while let Some(update) = updates.recv().await {
                    if let Some(record) = write(&tasks).get_mut(&id) {
                        record.status.progress = Some(update);
                    }
                }
            })
        };

        let context = TaskContext {
            id: id.clone(),
            cancel: cancel.clone(),
            progress,
        };
        let body = self.runtime.spawn(task(context));

        let tasks = Arc::clone(&self.tasks);
        let task_id = id.clone();
        self.runtime.spawn(async move {
            let outcome = match body.await {
                Ok(outcome) => outcome,
                Err(err) => Err(E::panicked(panic_message(err))),
            };
            // The body owned every progress sender, so the listener drains the
            // remaining updates and stops.
            let _ = listener.await;

            let (state, error) = if cancel.is_cancelled() {
                (TaskState::Cancelled, Some(E::cancelled()))
            } else {
                match outcome {
                    Ok(()) => (TaskState::Completed, None),
                    Err(err) => (TaskState::Failed, Some(err)),
                }
            };

            if let Some(record) = write(&tasks).get_mut(&task_id) {
                if !record.status.finish(state, error) {
                    debug!(task_id = %task_id, "terminal state already recorded");
                }
            }
            info!(task_id = %task_id, state = %state, "task finished");
            let _ = done_tx.send(true);
        });

        id
    }

    /// Signal cancellation. Does not wait for the task to stop.
    pub fn cancel_task(&self, id: &str) -> Result<()> {
        let tasks = read(&self.tasks);
        let record = tasks
            .get(id)
            .ok_or_else(|| Error::UnknownTask(id.to_string()))?;
        record.cancel.cancel();
        debug!(task_id = %id, "cancellation requested");
        Ok(())
    }

    pub fn get_task_status(&self, id: &str) -> Option<TaskStatus<P, E>> {
        read(&self.tasks).get(id).map(|record| record.status.clone())
    }

    /// Snapshots of every registered task, ordered by id.
    pub fn list_tasks(&self) -> Vec<TaskStatus<P, E>> {
        let mut all: Vec<_> = read(&self.tasks)
            .values()
            .map(|record| record.status.clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Block until the task reaches a terminal state. Returns at once for unknown ids.
    pub async fn wait_for_task(&self, id: &str) {
        let done = read(&self.tasks).get(id).map(|record| record.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Forget a task. Unknown ids are ignored.
    pub fn cleanup_task(&self, id: &str) {
        if write(&self.tasks).remove(id).is_some() {
            debug!(task_id = %id, "task removed");
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task was aborted".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    enum TestError {
        Cancelled,
        Panicked(String),
        Failed(&'static str),
    }

    impl TaskFailure for TestError {
        fn cancelled() -> Self {
            Self::Cancelled
        }

        fn panicked(message: String) -> Self {
            Self::Panicked(message)
        }
    }

    fn manager() -> TaskManager<u32, TestError> {
        TaskManager::new(Handle::current())
    }

    #[tokio::test]
    async fn ids_use_name_and_counter() {
        let tasks = manager();
        let a = tasks.start_task("compress", |_| async { Ok(()) });
        let b = tasks.start_task("extract", |_| async { Ok(()) });
        assert_eq!(a, "compress-1");
        assert_eq!(b, "extract-2");
    }

    #[tokio::test]
    async fn successful_task_completes() {
        let tasks = manager();
        let id = tasks.start_task("ok", |_| async { Ok(()) });
        tasks.wait_for_task(&id).await;
        let status = tasks.get_task_status(&id).unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert!(status.completed && !status.running && !status.cancelled);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn failing_task_records_error() {
        let tasks = manager();
        let id = tasks.start_task("bad", |_| async { Err(TestError::Failed("disk")) });
        tasks.wait_for_task(&id).await;
        let status = tasks.get_task_status(&id).unwrap();
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.error, Some(TestError::Failed("disk")));
    }

    #[tokio::test]
    async fn last_progress_is_visible_after_wait() {
        let tasks = manager();
        let id = tasks.start_task("count", |ctx| async move {
            for n in 0..=10u32 {
                ctx.progress().deliver(n).await;
            }
            Ok(())
        });
        tasks.wait_for_task(&id).await;
        assert_eq!(tasks.get_task_status(&id).unwrap().progress, Some(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_wins_over_body_result() {
        let tasks = manager();
        let id = tasks.start_task("slow", |ctx| async move {
            ctx.cancel_token().cancelled().await;
            // The body reports success even though it was cancelled.
            Ok(())
        });
        tasks.cancel_task(&id).unwrap();
        tasks.wait_for_task(&id).await;
        let status = tasks.get_task_status(&id).unwrap();
        assert_eq!(status.state, TaskState::Cancelled);
        assert!(status.cancelled);
        assert_eq!(status.error, Some(TestError::Cancelled));
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let tasks = manager();
        let id = tasks.start_task("boom", |_| async {
            let items: Vec<u32> = Vec::new();
            let _ = items[3];
            Ok(())
        });
        tasks.wait_for_task(&id).await;
        let status = tasks.get_task_status(&id).unwrap();
        assert_eq!(status.state, TaskState::Failed);
        assert!(matches!(status.error, Some(TestError::Panicked(_))));
    }

    #[tokio::test]
    async fn unknown_ids() {
        let tasks = manager();
        assert!(tasks.get_task_status("nope-1").is_none());
        assert_eq!(
            tasks.cancel_task("nope-1"),
            Err(Error::UnknownTask("nope-1".to_string()))
        );
        tasks.cleanup_task("nope-1");
        tokio::time::timeout(Duration::from_secs(1), tasks.wait_for_task("nope-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cleanup_removes_bookkeeping() {
        let tasks = manager();
        let id = tasks.start_task("ok", |_| async { Ok(()) });
        tasks.wait_for_task(&id).await;
        assert_eq!(tasks.list_tasks().len(), 1);
        tasks.cleanup_task(&id);
        assert!(tasks.get_task_status(&id).is_none());
        assert!(tasks.list_tasks().is_empty());
    }
}
