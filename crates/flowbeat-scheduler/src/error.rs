use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided flow definition is invalid (bad interval, duplicate name, ...).
    #[error("Invalid flow: {0}")]
    InvalidFlow(String),

    /// No flow with the given name exists in the store.
    #[error("Flow not found: {name}")]
    FlowNotFound { name: String },

    /// The flow names a handler that is not registered.
    #[error("No handler registered as '{handler}' for flow '{flow}'")]
    HandlerNotFound { flow: String, handler: String },

    /// The handler ran and returned an error.
    #[error("Flow '{flow}' failed: {message}")]
    Execution { flow: String, message: String },

    /// Another executor claimed the run first. Callers skip the run.
    #[error("Run already claimed: {id}")]
    RunClaimed { id: String },

    /// The run is not in a state that permits the requested transition.
    #[error("Run {id} is '{status}' and cannot transition")]
    InvalidTransition { id: String, status: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
