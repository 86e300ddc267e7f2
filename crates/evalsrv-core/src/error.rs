//! Top-level error hierarchy shared by every crate in the workspace.

use thiserror::Error;

/// Errors that can surface from the host layer: configuration, queueing,
/// and request handling. Guest-side failures (a thrown exception, a
/// timeout, an OOM) are never represented here — they are captured by the
/// Isolate Runner and turned into a sentinel string, per spec.
#[derive(Debug, Error)]
pub enum EvalServerError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("queue is full")]
    QueueFull,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type EvalServerResult<T> = Result<T, EvalServerError>;
