//! Error types for batchlet

use thiserror::Error;

/// Main error type for batchlet
///
/// Structural variants indicate a cache or session invariant violation and
/// are reported without retry; policy variants are expected scheduling
/// outcomes recorded on the task or job and retried next cycle.
#[derive(Error, Debug)]
pub enum BatchletError {
    /// Configuration error, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Task is already present on the node
    #[error("Task <{task}> already on node <{node}>")]
    DuplicateTask { task: String, node: String },

    /// Task was expected on the node but is not there
    #[error("Failed to find task <{task}> on node <{node}>")]
    TaskNotOnNode { task: String, node: String },

    /// Job not found in the snapshot
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Task not found in its owning job
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Node not found in the snapshot
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Task status does not admit the requested transition
    #[error("Invalid status transition for task <{task}>: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    /// Subtraction would leave a negative resource component
    #[error("Resource underflow: <{rhs}> exceeds <{lhs}>")]
    ResourceUnderflow { lhs: String, rhs: String },

    /// Task cannot be placed on the node for a hard constraint reason
    #[error("Task <{task}> unschedulable on node <{node}>: {reason}")]
    Unschedulable {
        task: String,
        node: String,
        reason: String,
    },

    /// Node lacks the capacity for the task right now; preemption may help
    #[error("Task <{task}> does not fit on node <{node}>")]
    InsufficientResources { task: String, node: String },

    /// Binding failed at the external orchestrator
    #[error("Binding error: {0}")]
    Binding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for batchlet operations
pub type BatchletResult<T> = Result<T, BatchletError>;

impl From<serde_yaml::Error> for BatchletError {
    fn from(err: serde_yaml::Error) -> Self {
        BatchletError::Config(err.to_string())
    }
}
