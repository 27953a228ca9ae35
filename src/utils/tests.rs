use std::sync::{Arc, Mutex};

use super::error::{CodecError, HandlerError, TransportError};
use super::logging::{self, Log};

#[derive(Default)]
struct RecordingLog {
    lines: Mutex<Vec<String>>,
}

impl Log for RecordingLog {
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("INFO {message}"));
    }

    fn warn(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("WARN {message}"));
    }

    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("ERROR {message}"));
    }
}

#[test]
fn test_logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
    logging::init("nonsense");
}

#[test]
fn test_injected_log_is_usable_as_trait_object() {
    let recorder = Arc::new(RecordingLog::default());
    let log: Arc<dyn Log> = recorder.clone();

    log.info("connected");
    log.warn("retrying");
    log.error("gave up");

    let lines = recorder.lines.lock().unwrap();
    assert_eq!(
        *lines,
        vec!["INFO connected", "WARN retrying", "ERROR gave up"]
    );
}

#[test]
fn test_decode_failures_become_malformed_handler_errors() {
    let err = CodecError::Decode("expected value at line 1".into());
    let handler_err = HandlerError::from(err);
    assert!(matches!(handler_err, HandlerError::Malformed(_)));
}

#[test]
fn test_encode_failures_are_not_malformed() {
    let err = CodecError::Encode("key must be a string".into());
    let handler_err = HandlerError::from(err);
    assert!(matches!(handler_err, HandlerError::Failed(_)));
}

#[test]
fn test_protocol_errors_are_not_transient() {
    assert!(TransportError::ConnectionRefused("localhost:5672".into()).is_transient());
    assert!(TransportError::Unreachable("rabbit".into()).is_transient());
    assert!(TransportError::ConnectionLost("channel closed".into()).is_transient());
    assert!(!TransportError::Protocol("PRECONDITION_FAILED".into()).is_transient());
}
