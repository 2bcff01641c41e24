use admin_task_queue::{ErrorCode, TaskError, TaskQueueError, TaskStatus};
use serde_json::json;
use std::io;

#[test]
fn test_classify_messages() {
    assert_eq!(
        TaskError::classify("Connection refused by 10.0.0.1").code,
        ErrorCode::TransientError
    );
    assert_eq!(
        TaskError::classify("Authentication failed for user ci").code,
        ErrorCode::PermanentError
    );
    assert_eq!(
        TaskError::classify("No space left on device").code,
        ErrorCode::ResourceError
    );
    assert_eq!(
        TaskError::classify("something odd happened").code,
        ErrorCode::UnknownError
    );
    assert!(!TaskError::classify("something odd happened").is_retryable());
}

#[test]
fn test_io_errors_map_by_kind() {
    let err = TaskError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
    assert_eq!(err.code, ErrorCode::TransientError);
    assert!(err.is_retryable());

    let err = TaskError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
    assert_eq!(err.code, ErrorCode::PermanentError);
    assert!(!err.is_retryable());
}

#[test]
fn test_explicit_retry_override() {
    let err = TaskError::transient("flaky").with_retryable(false);
    assert!(!err.is_retryable());

    let err = TaskError::domain("DOCKER_PUSH_FAILED", "push rejected").with_retryable(true);
    assert!(err.is_retryable());
    assert_eq!(err.code.as_str(), "DOCKER_PUSH_FAILED");
}

#[test]
fn test_task_error_serializes_code_as_string() {
    let err = TaskError::domain("FTP_CONNECTION_FAILED", "refused").with_details(json!({"port": 21}));
    let value = serde_json::to_value(&err).unwrap();

    assert_eq!(value["code"], "FTP_CONNECTION_FAILED");
    assert_eq!(value["details"]["port"], 21);
    assert_eq!(err.to_string(), "FTP_CONNECTION_FAILED: refused");
}

#[test]
fn test_queue_error_codes() {
    let err = TaskQueueError::InvalidState {
        task_id: "t-1".to_string(),
        status: TaskStatus::Cancelled,
        operation: "pause",
    };
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert_eq!(
        TaskQueueError::TaskNotFound("t-2".to_string()).code().as_str(),
        "QUEUE_TASK_NOT_FOUND"
    );
    assert_eq!(TaskQueueError::ShuttingDown.code(), ErrorCode::ResourceError);
}
