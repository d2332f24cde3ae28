//! Engine and boundary error taxonomy.
//!
//! Failures that orchestration logic should observe travel as
//! [`crate::history::TaskFailureDetails`] data, not as this error type; this
//! enum covers engine misuse and dispatch-boundary problems.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A work item could not be decoded or is structurally invalid. The item
    /// must not be acknowledged so the hub can redeliver it.
    #[error("malformed work item: {0}")]
    MalformedWorkItem(String),

    #[error("unknown orchestration '{0}'")]
    UnknownOrchestration(String),

    #[error("unknown activity '{0}'")]
    UnknownActivity(String),

    /// Orchestration logic emitted an action after `CompleteOrchestration`,
    /// or a second completion in the same pass.
    #[error("orchestrator action emitted after completion")]
    ActionAfterCompletion,

    #[error("instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("instance '{0}' already exists")]
    InstanceAlreadyExists(String),

    #[error("instance '{0}' is in a terminal state")]
    InstanceTerminal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task hub / transport level failure.
    #[error("task hub error: {0}")]
    Hub(String),
}
