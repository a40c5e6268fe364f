//! Error types for nettune

use thiserror::Error;

/// nettune error type
///
/// The first six variants mirror the failure taxonomy of the change
/// pipeline. Validation and rendering never surface these past their own
/// boundary; they report issues instead.
#[derive(Error, Debug)]
pub enum NetTuneError {
    /// Plan does not match the schema
    #[error("schema violation at {path}: {message}")]
    SchemaViolation { path: String, message: String },

    /// Plan is well-formed but breaks a cross-field rule
    #[error("policy violation at {path}: {message}")]
    PolicyViolation { path: String, message: String },

    /// External command failed or timed out
    #[error("command failed: {command}: {message}")]
    CommandExecution { command: String, message: String },

    /// Snapshot could not be captured or persisted
    #[error("checkpoint creation failed: {0}")]
    CheckpointCreation(String),

    /// Restore from a checkpoint failed
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// A probe tool is missing or unreachable
    #[error("benchmark unavailable: {0}")]
    BenchmarkUnavailable(String),

    /// Requested object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Another apply or benchmark holds the host
    #[error("host busy: {0}")]
    Busy(String),

    /// Checkpoint storage failure
    #[error("checkpoint storage: {0}")]
    Storage(String),

    /// Command rejected before spawning
    #[error("command not allowed: {0}")]
    NotAllowed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for nettune
pub type NetTuneResult<T> = Result<T, NetTuneError>;
