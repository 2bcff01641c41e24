//! Error codes recorded on failed tasks

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error code taxonomy for task and queue failures.
///
/// The fixed codes cover the queue's own failure modes; `Domain` carries
/// codes owned by handler domains (`DOCKER_PUSH_FAILED`, `FTP_AUTHENTICATION_FAILED`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ErrorCode {
    /// Malformed or missing params
    ValidationError,
    /// No handler registered for the task type
    HandlerNotFound,
    /// Network, connection or timeout-class failure
    TransientError,
    /// Authentication, authorization, not-found or permission failure
    PermanentError,
    /// Disk space, memory limit, queue full
    ResourceError,
    /// Executor-enforced deadline exceeded
    SystemTimeout,
    /// Control operation on an unknown task
    QueueTaskNotFound,
    /// Control operation on a task in the wrong state
    InvalidState,
    /// Task was cancelled before it could finish
    Cancelled,
    /// Unclassified handler failure
    UnknownError,
    /// Domain specific code
    Domain(String),
}

/// Substrings of domain codes that mark a failure as transient.
const RETRYABLE_DOMAIN_MARKERS: &[&str] = &[
    "NETWORK",
    "TIMEOUT",
    "CONNECTION",
    "UNAVAILABLE",
    "RATE_LIMIT",
];

impl ErrorCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::HandlerNotFound => "HANDLER_NOT_FOUND",
            ErrorCode::TransientError => "TRANSIENT_ERROR",
            ErrorCode::PermanentError => "PERMANENT_ERROR",
            ErrorCode::ResourceError => "RESOURCE_ERROR",
            ErrorCode::SystemTimeout => "SYSTEM_TIMEOUT",
            ErrorCode::QueueTaskNotFound => "QUEUE_TASK_NOT_FOUND",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::Cancelled => "TASK_CANCELLED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::Domain(code) => code,
        }
    }

    /// Whether failures with this code are retried automatically when the
    /// handler does not say otherwise.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorCode::TransientError | ErrorCode::ResourceError | ErrorCode::SystemTimeout => true,
            ErrorCode::Domain(code) => {
                let code = code.to_ascii_uppercase();
                RETRYABLE_DOMAIN_MARKERS
                    .iter()
                    .any(|marker| code.contains(marker))
            }
            _ => false,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "VALIDATION_ERROR" => ErrorCode::ValidationError,
            "HANDLER_NOT_FOUND" => ErrorCode::HandlerNotFound,
            "TRANSIENT_ERROR" => ErrorCode::TransientError,
            "PERMANENT_ERROR" => ErrorCode::PermanentError,
            "RESOURCE_ERROR" => ErrorCode::ResourceError,
            "SYSTEM_TIMEOUT" => ErrorCode::SystemTimeout,
            "QUEUE_TASK_NOT_FOUND" => ErrorCode::QueueTaskNotFound,
            "INVALID_STATE" => ErrorCode::InvalidState,
            "TASK_CANCELLED" => ErrorCode::Cancelled,
            "UNKNOWN_ERROR" => ErrorCode::UnknownError,
            _ => ErrorCode::Domain(code),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::from(code.to_string())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

/// Failure raised by a task handler.
///
/// Plain data: it is recorded on the task as `error`, `error_code` and
/// `error_details` rather than propagated to queue callers.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct TaskError {
    /// Classified error code
    pub code: ErrorCode,

    /// Human readable message
    pub message: String,

    /// Structured details (exit codes, stderr, paths, ...)
    pub details: Option<serde_json::Value>,

    /// Explicit retry decision; falls back to the code's default when unset
    pub retryable: Option<bool>,
}

const RESOURCE_MARKERS: &[&str] = &[
    "no space",
    "disk full",
    "out of memory",
    "memory limit",
    "quota",
    "too many",
];

const PERMANENT_MARKERS: &[&str] = &[
    "authentication",
    "unauthorized",
    "forbidden",
    "permission denied",
    "access denied",
    "not found",
    "no such",
    "does not exist",
    "invalid",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection",
    "network",
    "temporarily",
    "unreachable",
    "broken pipe",
    "try again",
    "unavailable",
];

impl TaskError {
    /// Create an error with an explicit code
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
        }
    }

    /// Missing or malformed params
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Network/connection class failure, retried by default
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransientError, message)
    }

    /// Auth/not-found class failure, never retried by default
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermanentError, message)
    }

    /// Resource exhaustion, retried by default
    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceError, message)
    }

    /// Domain specific code such as `DOCKER_PUSH_FAILED`
    pub fn domain(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::from(code.into()), message)
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the default retry decision of the code
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Classify a free-form failure message with the default heuristic.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let matches = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

        let code = if matches(RESOURCE_MARKERS) {
            ErrorCode::ResourceError
        } else if matches(PERMANENT_MARKERS) {
            ErrorCode::PermanentError
        } else if matches(TRANSIENT_MARKERS) {
            ErrorCode::TransientError
        } else {
            ErrorCode::UnknownError
        };

        Self::new(code, message)
    }

    /// Whether the executor may retry this failure automatically
    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or_else(|| self.code.is_retryable())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock => ErrorCode::TransientError,
            ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::AlreadyExists
            | ErrorKind::InvalidInput
            | ErrorKind::InvalidData
            | ErrorKind::Unsupported => ErrorCode::PermanentError,
            ErrorKind::OutOfMemory => ErrorCode::ResourceError,
            _ => return TaskError::classify(err.to_string()),
        };

        TaskError::new(code, err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::validation(err.to_string())
    }
}
