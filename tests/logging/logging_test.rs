//! Tests for logging setup.
//!
//! Only one global subscriber can exist per test binary, so the service
//! test tolerates losing that race and only checks the filesystem effect.

use pondside::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_service_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("nested").join("logs");
    assert!(!logs_dir.exists());

    let _guard = pondside::logging::init_service(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_twice_does_not_panic() {
    pondside::logging::init_cli();
    pondside::logging::init_cli();
}
