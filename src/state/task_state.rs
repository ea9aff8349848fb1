/// Task state definitions for the durable queue
///
/// Completed tasks are deleted from the queue, so only states that still
/// need attention are represented.
use std::fmt;

/// Represents the current state of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting for a worker (possibly delayed by retry backoff)
    Queued,

    /// Leased by a worker
    Running,

    /// Exhausted its retries or could not be dispatched; kept for inspection
    Failed,
}

impl TaskState {
    /// Converts the task state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }

    /// Parses a task state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all task states
    pub fn all() -> [TaskState; 3] {
        [Self::Queued, Self::Running, Self::Failed]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
