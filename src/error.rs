//! Error types for the shade worker.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the worker node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Self-test error: {0}")]
    SelfTest(#[from] SelfTestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Self-test fixture errors.
#[derive(Debug, thiserror::Error)]
pub enum SelfTestError {
    #[error("Fixture directory {0} not found")]
    MissingFixtures(String),

    #[error("No fixture cases in {0}")]
    NoCases(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No engine endpoints configured")]
    NoEngines,
}

/// Errors raised while accepting or executing a task.
///
/// `UnsupportedMediaType` and `MissingInput` mean the dispatcher sent a bad
/// task; `Processing` and `Storage` mean the work itself failed.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Field {field} does not accept content type {content_type} (accepted: {accepted})")]
    UnsupportedMediaType {
        field: String,
        content_type: String,
        accepted: String,
    },

    #[error("Task is missing input field {field}")]
    MissingInput { field: String },

    #[error("Processing of task {task_id} failed: {reason}")]
    Processing { task_id: Uuid, reason: String },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Task queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Task intake has stopped")]
    Stopped,
}

impl TaskError {
    /// Whether the task was rejected before any processing happened.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMediaType { .. } | Self::MissingInput { .. }
        )
    }
}

/// Failure reported by a processing unit.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Could not decode {field}: {reason}")]
    Decode { field: String, reason: String },

    #[error("Input {field} is empty")]
    EmptyInput { field: String },

    #[error("Missing input {0}")]
    MissingField(String),

    #[error("Could not encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Blob storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob not found: {handle}")]
    NotFound { handle: String },

    #[error("Invalid blob handle: {handle}")]
    InvalidHandle { handle: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors talking to a remote engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Could not build HTTP client: {0}")]
    ClientSetup(#[from] reqwest::Error),

    #[error("Announcement to {endpoint} failed: {reason}")]
    AnnouncementFailure { endpoint: String, reason: String },

    #[error("Deregistration from {endpoint} failed: {reason}")]
    DeregistrationFailure { endpoint: String, reason: String },

    #[error("Reporting task {task_id} to {destination} failed: {reason}")]
    ReportFailure {
        task_id: Uuid,
        destination: String,
        reason: String,
    },
}

/// Lifecycle state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimedOut(Duration),
}

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;
