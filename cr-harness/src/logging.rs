//! Structured logging for functional tests.
//!
//! [`init_test_logging`] installs one global subscriber per test process:
//! compact human-readable lines through the test writer, plus every event as
//! JSONL under `target/test-logs/` for post-mortem debugging of CI failures.
//!
//! # Environment Variables
//!
//! - `CR_TEST_LOG_FILE`: Override the log file path (default: `target/test-logs/functional_tests.jsonl`)
//! - `CR_TEST_LOG_LEVEL`: Set log level filter (default: `debug`)

use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::config::EnvParser;

static LOGGING_INIT: Once = Once::new();

/// Target of the per-test progress lines emitted by test suites.
pub const TEST_LOG_TARGET: &str = "test";

/// Phase of a functional test, attached to harness log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    SetUp,
    Body,
    TearDown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetUp => write!(f, "set_up"),
            Self::Body => write!(f, "body"),
            Self::TearDown => write!(f, "tear_down"),
        }
    }
}

/// Initialize test logging. Safe to call multiple times; only the first call
/// installs a subscriber, and an already-installed global subscriber wins.
pub fn init_test_logging() {
    LOGGING_INIT.call_once(|| {
        let mut env = EnvParser::new();
        let level = env.get_log_level("TEST_LOG_LEVEL", "debug");
        let log_path = env.get_optional_string("TEST_LOG_FILE");

        let file_layer = create_log_file(log_path.value).map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let filter = tracing_subscriber::EnvFilter::try_new(filter_directives(&level.value))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);

        for err in env.errors() {
            tracing::warn!(error = %err, "Ignoring invalid logging setting");
        }
    });
}

fn filter_directives(level: impl std::fmt::Display) -> String {
    format!("cr_harness={level},cr_stub={level},{TEST_LOG_TARGET}={level}")
}

fn create_log_file(custom_path: Option<String>) -> Option<std::fs::File> {
    if let Some(custom_path) = custom_path {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = find_target_dir().join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("functional_tests.jsonl")).ok()
}

/// Find the target directory by searching up from current dir.
fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}
