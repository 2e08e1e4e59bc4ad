//! Unit tests for Engine singleton manager
//!
//! Tests initialization, reconstructor management and logging APIs.
//!
//! IMPORTANT: ENGINE_STATE is a global OnceLock shared across all tests.
//! All tests are marked with #[serial] to run sequentially and avoid RwLock poisoning.

use crate::galaxy3d::{Engine, Error, ReconstructionConfig};
use crate::galaxy3d::log::{Logger, LogEntry, LogSeverity};
use crate::galaxy3d::reconstruction::ReducedMesh;
use std::sync::{Arc, Mutex};
use serial_test::serial;

// ============================================================================
// TEST HELPERS
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.push(format!("{:?}: {}", entry.severity, entry.message));
    }
}

/// Install a capturing logger and hand back its entries
fn capture_logs() -> Arc<Mutex<Vec<String>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(TestLogger { entries: Arc::clone(&entries) });
    entries
}

/// ENGINE_STATE stays initialized once set; clear the session between tests
fn setup() {
    Engine::reset_for_testing();
    let _ = Engine::initialize();
}

// ============================================================================
// INITIALIZATION AND SHUTDOWN TESTS
// ============================================================================

#[test]
#[serial]
fn test_engine_initialize_is_idempotent() {
    setup();
    assert!(Engine::initialize().is_ok());
    assert!(Engine::initialize().is_ok());
}

#[test]
#[serial]
fn test_shutdown_clears_reconstructor() {
    setup();
    Engine::create_reconstructor(ReconstructionConfig::default()).unwrap();
    assert!(Engine::reconstructor().is_ok());

    Engine::shutdown();

    assert!(matches!(Engine::reconstructor(), Err(Error::InitializationFailed(_))));
}

#[test]
#[serial]
fn test_shutdown_idempotent() {
    setup();
    Engine::shutdown();
    Engine::shutdown();
    assert!(Engine::reconstructor().is_err());
}

// ============================================================================
// RECONSTRUCTOR TESTS
// ============================================================================

#[test]
#[serial]
fn test_create_and_use_reconstructor() {
    setup();
    Engine::create_reconstructor(ReconstructionConfig::default()).unwrap();

    let session = Engine::reconstructor().unwrap();
    let output = session.lock().unwrap().process_frame(ReducedMesh::default()).unwrap();
    assert_eq!(output.stats.frame_index, 1);

    // Every handle points at the same session
    let again = Engine::reconstructor().unwrap();
    assert!(Arc::ptr_eq(&session, &again));
    assert_eq!(again.lock().unwrap().frame_index(), 1);

    Engine::destroy_reconstructor().unwrap();
}

#[test]
#[serial]
fn test_create_reconstructor_twice_fails() {
    setup();
    Engine::create_reconstructor(ReconstructionConfig::default()).unwrap();

    let result = Engine::create_reconstructor(ReconstructionConfig::default());
    assert!(matches!(result, Err(Error::InitializationFailed(_))));

    Engine::destroy_reconstructor().unwrap();
}

#[test]
#[serial]
fn test_create_reconstructor_with_invalid_config_fails() {
    setup();
    let config = ReconstructionConfig { max_confidence: 0, ..Default::default() };

    assert!(matches!(Engine::create_reconstructor(config), Err(Error::InitializationFailed(_))));
    assert!(Engine::reconstructor().is_err());
}

#[test]
#[serial]
fn test_destroy_then_recreate() {
    setup();
    Engine::create_reconstructor(ReconstructionConfig::default()).unwrap();
    let old = Engine::reconstructor().unwrap();

    Engine::destroy_reconstructor().unwrap();
    assert!(Engine::reconstructor().is_err());

    // Outstanding handles outlive the singleton
    assert_eq!(old.lock().unwrap().frame_index(), 0);

    Engine::create_reconstructor(ReconstructionConfig::default()).unwrap();
    let new = Engine::reconstructor().unwrap();
    assert!(!Arc::ptr_eq(&old, &new));

    Engine::destroy_reconstructor().unwrap();
}

#[test]
#[serial]
fn test_destroy_without_reconstructor_is_ok() {
    setup();
    assert!(Engine::destroy_reconstructor().is_ok());
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_set_logger_captures_entries() {
    setup();
    let entries = capture_logs();

    Engine::log(LogSeverity::Info, "galaxy3d::Test", "hello".to_string());
    Engine::log_detailed(LogSeverity::Error, "galaxy3d::Test", "boom".to_string(), file!(), line!());

    let captured = entries.lock().unwrap().clone();
    assert!(captured.contains(&"Info: hello".to_string()));
    assert!(captured.contains(&"Error: boom".to_string()));

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_errors_are_logged() {
    setup();
    let entries = capture_logs();

    assert!(Engine::reconstructor().is_err());

    let captured = entries.lock().unwrap().clone();
    assert!(captured
        .iter()
        .any(|line| line.starts_with("Error: Initialization failed: Reconstructor not created")));

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_session_lifecycle_is_logged() {
    setup();
    let entries = capture_logs();

    Engine::create_reconstructor(ReconstructionConfig::default()).unwrap();
    Engine::destroy_reconstructor().unwrap();

    let captured = entries.lock().unwrap().clone();
    assert!(captured.contains(&"Info: Reconstructor singleton created successfully".to_string()));
    assert!(captured.contains(&"Info: Reconstructor singleton destroyed".to_string()));

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_reset_logger_detaches_custom_logger() {
    setup();
    let entries = capture_logs();
    Engine::reset_logger();

    Engine::log(LogSeverity::Warn, "galaxy3d::Test", "after reset".to_string());

    assert!(!entries.lock().unwrap().iter().any(|line| line.contains("after reset")));
}
