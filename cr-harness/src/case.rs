//! Base for functional tests that run against a live cluster.
//!
//! [`FunctionalTestCase::run`] is the usual entry point: it starts a cluster,
//! hands it to the test body, and tears it down afterwards whether the body
//! passed, returned an error, or panicked.
//!
//! Teardown order is fixed: drain the queue (bounded, errors only logged),
//! terminate every process, check exit codes, then remove the working
//! directories. Directories are removed even when the exit-code check fails.

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::cluster::{ClusterConfig, ClusterController, ExitCodePolicy, verify_clean_exit};
use crate::error::{HarnessError, HarnessResult};
use crate::fs_item::FsItem;
use crate::logging::{TestPhase, init_test_logging};
use crate::spawner::ServiceSpawner;
use crate::status::{ExpectedOutcome, check_status_subset};
use crate::tree::{MatchResult, VerifyPolicy, verify_directory_contents};

/// How long teardown waits for queued builds before terminating anyway.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct FunctionalTestCase {
    cluster: ClusterController,
    verbose: bool,
    torn_down: bool,
}

impl FunctionalTestCase {
    /// Initialize logging and start a cluster. `CR_VERBOSE` and
    /// `CR_STARTUP_TIMEOUT_SECS` are applied on top of `config`.
    pub fn set_up(config: ClusterConfig, spawner: &dyn ServiceSpawner) -> HarnessResult<Self> {
        init_test_logging();
        let config = config.apply_env();
        let verbose = config.verbose;
        info!(phase = %TestPhase::SetUp, verbose, "Setting up functional test");

        let cluster = ClusterController::start(config, spawner)?;
        Ok(Self {
            cluster,
            verbose,
            torn_down: false,
        })
    }

    /// Set up, run `body`, and always tear down.
    ///
    /// The body's error wins over a teardown error. A panic in the body is
    /// resumed after teardown.
    pub fn run<F>(config: ClusterConfig, spawner: &dyn ServiceSpawner, body: F) -> HarnessResult<()>
    where
        F: FnOnce(&mut Self) -> HarnessResult<()>,
    {
        let mut case = Self::set_up(config, spawner)?;

        info!(phase = %TestPhase::Body, "Running test body");
        let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut case)));
        let teardown = case.tear_down();

        match outcome {
            Ok(Ok(())) => teardown,
            Ok(Err(err)) => {
                if let Err(teardown_err) = teardown {
                    error!(error = %teardown_err, "Teardown also failed");
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(teardown_err) = teardown {
                    error!(error = %teardown_err, "Teardown after panic failed");
                }
                resume_unwind(panic)
            }
        }
    }

    pub fn cluster(&self) -> &ClusterController {
        &self.cluster
    }

    pub fn cluster_mut(&mut self) -> &mut ClusterController {
        &mut self.cluster
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Drain, terminate, verify exit codes, and release working directories.
    ///
    /// Runs at most once; later calls return `Ok(())`.
    pub fn tear_down(&mut self) -> HarnessResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        info!(phase = %TestPhase::TearDown, "Tearing down cluster");

        // Leftover builds must not keep the cluster alive.
        if let Err(err) = self.cluster.block_until_queue_empty(DRAIN_TIMEOUT) {
            warn!(error = %err, "Build queue did not drain; terminating anyway");
        }

        let records = self.cluster.terminate_all();
        let verified = verify_clean_exit(&records, ExitCodePolicy::for_current_platform());
        if let Err(err) = &verified {
            error!(error = %err, "Services did not exit cleanly");
        }

        let released = self.cluster.release_work_dirs();
        verified.and(released)
    }

    /// The build's status object must contain every key of `expected` with
    /// an equal value.
    pub fn assert_build_status_contains_expected_data(
        &self,
        build_id: u64,
        expected: &Value,
    ) -> HarnessResult<()> {
        let Some(expected) = expected.as_object() else {
            return Err(HarnessError::InvalidExpectation(format!(
                "expected build data must be a JSON object, got {expected}"
            )));
        };
        let response = self.cluster.api().get_build_status(build_id)?;
        check_status_subset(build_id, expected, &response)
    }

    pub fn assert_build_has_successful_status(&self, build_id: u64) -> HarnessResult<()> {
        self.assert_build_outcome(build_id, ExpectedOutcome::Succeeded)
    }

    pub fn assert_build_has_failure_status(&self, build_id: u64) -> HarnessResult<()> {
        self.assert_build_outcome(build_id, ExpectedOutcome::Failed)
    }

    pub fn assert_build_has_canceled_status(&self, build_id: u64) -> HarnessResult<()> {
        self.assert_build_outcome(build_id, ExpectedOutcome::Canceled)
    }

    fn assert_build_outcome(&self, build_id: u64, outcome: ExpectedOutcome) -> HarnessResult<()> {
        let response = self.cluster.api().get_build_status(build_id)?;
        check_status_subset(build_id, &outcome.fields(), &response)
    }

    /// The artifacts of `build_id` must be exactly `expected`.
    pub fn assert_build_artifact_contents_match_expected(
        &self,
        build_id: u64,
        expected: Vec<FsItem>,
    ) -> HarnessResult<()> {
        let dir = self.cluster.build_artifacts_dir(build_id)?;
        self.assert_directory_contents_match_expected(&dir, Some(expected))
    }

    /// `dir` must contain exactly `expected`. `None` skips the check.
    pub fn assert_directory_contents_match_expected(
        &self,
        dir: &Path,
        expected: Option<Vec<FsItem>>,
    ) -> HarnessResult<()> {
        let Some(expected) = expected else {
            return Ok(());
        };
        match verify_directory_contents(dir, expected, VerifyPolicy::EXACT)? {
            MatchResult::Match => Ok(()),
            MatchResult::Mismatch(mismatch) => Err(HarnessError::TreeMismatch {
                root: dir.to_path_buf(),
                mismatch,
            }),
        }
    }
}

impl Drop for FunctionalTestCase {
    fn drop(&mut self) {
        if let Err(err) = self.tear_down() {
            warn!(error = %err, "Teardown on drop failed");
        }
    }
}
