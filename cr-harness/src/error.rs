//! Error type shared by every harness operation.
//!
//! Assertion failures are ordinary variants: a failed status check, tree
//! comparison, or exit-code check fails the current test case and nothing
//! else. None of them are fatal to the harness itself.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::config::ConfigError;
use crate::fs_item::TreeError;
use crate::process::Role;
use crate::status::StatusDiscrepancy;
use crate::tree::Mismatch;

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Process failed to start: {0}")]
    ProcessStartFailed(String),

    #[error("Failed to signal {role} (pid {pid}): {message}")]
    SignalFailed { role: Role, pid: u32, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API request to {url} failed: {message}")]
    Api { url: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid expected tree: {0}")]
    InvalidTree(#[from] TreeError),

    #[error("Invalid expectation: {0}")]
    InvalidExpectation(String),

    #[error("Working directory for {0} is not available")]
    MissingWorkDir(Role),

    #[error(
        "Build status API response should contain the expected status data. \
         Build {build_id}: {}; expected subset {expected}, actual status {actual}",
        render_discrepancies(.discrepancies)
    )]
    StatusMismatch {
        build_id: u64,
        expected: Value,
        actual: Value,
        discrepancies: Vec<StatusDiscrepancy>,
    },

    #[error("Directory {} does not match expected contents: {mismatch}", .root.display())]
    TreeMismatch { root: PathBuf, mismatch: Mismatch },

    #[error("{}", render_exit_failures(.0))]
    ExitCodeMismatch(Vec<ExitFailure>),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// One process that did not exit with the clean code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitFailure {
    pub role: Role,
    pub url: String,
    pub actual: Option<i32>,
    pub expected: i32,
}

impl std::fmt::Display for ExitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.actual {
            Some(code) => write!(
                f,
                "Service {} running on url: {} should exit with code {}, but exited with code {}.",
                self.role, self.url, self.expected, code
            ),
            None => write!(
                f,
                "Service {} running on url: {} should exit with code {}, but never exited.",
                self.role, self.url, self.expected
            ),
        }
    }
}

fn render_discrepancies(discrepancies: &[StatusDiscrepancy]) -> String {
    discrepancies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_exit_failures(failures: &[ExitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_failure_message_names_role_and_url() {
        let failure = ExitFailure {
            role: Role::Worker(1),
            url: "http://127.0.0.1:43001".to_string(),
            actual: Some(3),
            expected: 0,
        };
        let msg = HarnessError::ExitCodeMismatch(vec![failure]).to_string();
        assert!(msg.contains("worker-1"));
        assert!(msg.contains("http://127.0.0.1:43001"));
        assert!(msg.contains("exited with code 3"));
    }

    #[test]
    fn test_exit_failure_without_code() {
        let failure = ExitFailure {
            role: Role::Coordinator,
            url: "http://127.0.0.1:43000".to_string(),
            actual: None,
            expected: 0,
        };
        assert!(failure.to_string().contains("never exited"));
    }
}
