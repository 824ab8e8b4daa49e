use super::error::ChatError;
use super::logging;
use std::io;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn test_parse_level() {
    assert_eq!(logging::parse_level("error"), tracing::Level::ERROR);
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level(" trace "), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("bogus"), tracing::Level::INFO);
}

#[test]
fn test_frame_errors_are_recoverable() {
    assert!(ChatError::MalformedEnvelope("x".into()).is_recoverable());
    assert!(ChatError::IncompleteEnvelope("username").is_recoverable());
    assert!(ChatError::ProtocolViolation("x".into()).is_recoverable());
}

#[test]
fn test_connection_errors_are_fatal() {
    assert!(!ChatError::ConnectionClosed.is_recoverable());
    assert!(!ChatError::FrameTooLarge { len: 10, max: 1 }.is_recoverable());
    assert!(!ChatError::NotConnected.is_recoverable());
    let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
    assert!(!ChatError::from(io_err).is_recoverable());
}

#[test]
fn test_error_messages() {
    assert_eq!(
        ChatError::IncompleteEnvelope("type").to_string(),
        "incomplete envelope: missing `type`"
    );
    assert_eq!(
        ChatError::FrameTooLarge { len: 9, max: 4 }.to_string(),
        "frame of 9 bytes exceeds the 4 byte limit"
    );
}
