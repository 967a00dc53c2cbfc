use crate::task::TaskId;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by tasks and the synchronization primitives.
///
/// The type is `Clone` so that an error captured from a task body can be
/// re-raised to every task that joins it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Invalid local storage key {0:?}: keys must be non-empty and free of whitespace")]
    InvalidKey(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Task {0} is dead")]
    DeadTarget(TaskId),

    #[error("Task {task} terminated with an error: {source}")]
    CapturedBodyError {
        task: TaskId,
        #[source]
        source: Box<Error>,
    },

    #[error("Task was killed")]
    Killed,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Mutex is not owned by task {0}")]
    NotOwner(TaskId),

    #[error("Deadlock: {0}")]
    Deadlock(String),

    #[error("Task {0} cannot suspend: only spawned tasks can block")]
    NotSuspendable(TaskId),

    #[error("Task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error("Task {0} is blocked but the event loop has nothing left to run")]
    Stalled(TaskId),

    #[error("Event loop turn budget of {0} turns exhausted")]
    BudgetExhausted(u64),

    #[error("No scheduler is active on this thread")]
    NoScheduler,

    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
}

impl Error {
    /// Wraps an application error message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns true if this error is the abort signal delivered by `kill`.
    pub fn is_killed(&self) -> bool {
        matches!(self, Self::Killed)
    }

    /// Returns the innermost error, looking through captured body errors.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::CapturedBodyError { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(Arc::new(error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaIndex;

    #[test]
    fn test_root_cause_unwraps_captured_errors() {
        let task = TaskId::from(ArenaIndex::new(3, 1));
        let error = Error::CapturedBodyError {
            task,
            source: Box::new(Error::CapturedBodyError {
                task,
                source: Box::new(Error::EmptyQueue),
            }),
        };

        assert!(matches!(error.root_cause(), Error::EmptyQueue));
        assert!(error.to_string().contains("#3:1"));
    }

    #[test]
    fn test_anyhow_errors_convert() {
        let error: Error = anyhow::anyhow!("disk on fire").into();
        assert_eq!(error.to_string(), "disk on fire");
        assert!(!error.is_killed());
        assert!(Error::Killed.is_killed());
    }
}
