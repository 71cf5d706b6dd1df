//! Error types for the orchestration engine

use thiserror::Error;

use crate::deploy::fsm::Phase;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// Reserved for strict breaker lookups; the lazily initialized
    /// registry never returns it
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Deployment aborted: {0}")]
    Aborted(String),

    #[error("Step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
