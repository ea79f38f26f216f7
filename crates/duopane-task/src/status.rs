use std::fmt;

/// Lifecycle of a task. `Running` moves to exactly one terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a task as seen by callers.
#[derive(Clone, Debug)]
pub struct TaskStatus<P, E> {
    pub id: String,
    pub state: TaskState,
    pub running: bool,
    pub completed: bool,
    pub cancelled: bool,
    pub error: Option<E>,
    /// Latest progress update drained from the task's queue.
    pub progress: Option<P>,
}

impl<P, E> TaskStatus<P, E> {
    pub(crate) fn running(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: TaskState::Running,
            running: true,
            completed: false,
            cancelled: false,
            error: None,
            progress: None,
        }
    }

    /// Move to a terminal state. Returns false if one was already set.
    pub(crate) fn finish(&mut self, state: TaskState, error: Option<E>) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.running = false;
        self.completed = state == TaskState::Completed;
        self.cancelled = state == TaskState::Cancelled;
        self.error = error;
        true
    }
}
