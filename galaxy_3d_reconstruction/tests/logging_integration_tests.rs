//! Integration tests for Engine logging system
//!
//! These tests verify the logger plumbing and what the frame pipeline logs.
//!
//! Run with: cargo test --test logging_integration_tests

mod mesh_test_utils;

use galaxy_3d_reconstruction::galaxy3d::{Engine, ReconstructionConfig, SceneReconstructor};
use galaxy_3d_reconstruction::galaxy3d::log::{Logger, LogEntry, LogSeverity};
use galaxy_3d_reconstruction::glam::Vec3;
use mesh_test_utils::triangle_mesh;
use std::sync::{Arc, Mutex};
use serial_test::serial;

// ============================================================================
// TEST LOGGER IMPLEMENTATION
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn entries_from(entries: &Arc<Mutex<Vec<LogEntry>>>, source: &str) -> Vec<LogEntry> {
    entries
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.source == source)
        .cloned()
        .collect()
}

// ============================================================================
// LOGGER PLUMBING
// ============================================================================

#[test]
#[serial]
fn test_integration_custom_logger() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log(LogSeverity::Info, "test::module", "Test info message".to_string());
    Engine::log(LogSeverity::Warn, "test::module", "Test warning message".to_string());

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].severity, LogSeverity::Info);
        assert_eq!(captured[0].message, "Test info message");
        assert_eq!(captured[1].severity, LogSeverity::Warn);
        assert_eq!(captured[1].file, None);
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_error_logging_with_location() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log_detailed(
        LogSeverity::Error,
        "test::error",
        "Critical error occurred".to_string(),
        "test_file.rs",
        42,
    );

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].file, Some("test_file.rs"));
        assert_eq!(captured[0].line, Some(42));
    }

    Engine::reset_logger();
}

// ============================================================================
// PIPELINE LOGS
// ============================================================================

#[test]
#[serial]
fn test_integration_frames_log_summaries() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let mut session = SceneReconstructor::new(ReconstructionConfig::default()).unwrap();
    session.process_frame(triangle_mesh(&[(Vec3::splat(0.02), 100)])).unwrap();

    let session_logs = entries_from(&entries, "galaxy3d::SceneReconstructor");
    assert!(session_logs.iter().any(|entry| entry.severity == LogSeverity::Info));
    assert!(session_logs
        .iter()
        .any(|entry| entry.severity == LogSeverity::Debug && entry.message.starts_with("Frame 1:")));
    assert!(!entries_from(&entries, "galaxy3d::SceneSorter").is_empty());

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_fallback_is_warned() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let mut config = ReconstructionConfig::default();
    config.initial_capacities.super_nano_sector = 1;
    config.capacity_limits.super_nano_sector = 1;
    let mut session = SceneReconstructor::new(config).unwrap();

    let output = session
        .process_frame(triangle_mesh(&[(Vec3::splat(0.02), 100), (Vec3::splat(0.5), 100)]))
        .unwrap();
    assert!(output.stats.fell_back);

    let warnings: Vec<LogEntry> = entries_from(&entries, "galaxy3d::SceneReconstructor")
        .into_iter()
        .filter(|entry| entry.severity == LogSeverity::Warn)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("replacing the mesh"));

    // The recovered limit breach stays at debug level
    let breaches: Vec<LogEntry> = entries
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.message.contains("super-nano sector") && entry.message.contains("limit is"))
        .cloned()
        .collect();
    assert!(!breaches.is_empty());
    assert!(breaches.iter().all(|entry| entry.severity == LogSeverity::Debug && entry.line.is_none()));

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_buffer_growth_is_logged() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let mut config = ReconstructionConfig::default();
    config.initial_capacities.triangle = 1;
    let mut session = SceneReconstructor::new(config).unwrap();
    session
        .process_frame(triangle_mesh(&[(Vec3::splat(0.02), 100), (Vec3::splat(0.5), 100)]))
        .unwrap();

    let captured = entries.lock().unwrap();
    assert!(captured
        .iter()
        .any(|entry| entry.severity == LogSeverity::Debug && entry.message.contains(" grown from 1 to ")));
    drop(captured);

    Engine::reset_logger();
}
