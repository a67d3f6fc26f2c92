use thiserror::Error;

/// Errors raised by the real-time monitors.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("sampling failed for monitor {monitor}: {reason}")]
    SamplingFailed { monitor: &'static str, reason: String },

    #[error("io error while scanning filesystem: {0}")]
    Io(#[from] std::io::Error),
}
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

/// Errors raised by the event queue.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue is at capacity ({max_size})")]
    Overflow { max_size: usize },

    #[error("unknown event id: {0}")]
    UnknownEvent(String),
}
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Errors raised by the cycle orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("cognitive stage failed: {0}")]
    CognitiveFailed(String),

    #[error("executor dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("no active cycle for action id {0}")]
    UnknownAction(String),
}
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised by the feedback processor.
#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("sink update failed: {0}")]
    SinkFailed(String),

    #[error("failed to persist feedback history: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("failed to (de)serialize feedback history: {0}")]
    Serialization(#[from] serde_json::Error),
}
pub type FeedbackResult<T> = std::result::Result<T, FeedbackError>;
