//! Functional-test harness for a coordinator + worker build cluster.
//!
//! The harness stands a cluster up for the duration of one test, lets the
//! test drive it through the coordinator's HTTP API, and tears it down with
//! a fixed sequence: bounded drain, termination of every process, exit-code
//! verification, and release of the per-role working directories.
//!
//! ```ignore
//! use cr_harness::{BinarySpawner, ClusterConfig, FsItem, FunctionalTestCase};
//!
//! let spawner = BinarySpawner::new(env!("CARGO_BIN_EXE_cr-stub"));
//! FunctionalTestCase::run(ClusterConfig::new("testsecret"), &spawner, |case| {
//!     case.assert_build_has_successful_status(1)?;
//!     case.assert_build_artifact_contents_match_expected(
//!         1,
//!         vec![FsItem::file("clusterrunner_exit_code", "0\n")],
//!     )
//! })?;
//! ```

pub mod api;
pub mod case;
pub mod cluster;
pub mod config;
pub mod error;
pub mod fs_item;
pub mod logging;
pub mod process;
pub mod spawner;
pub mod status;
pub mod tree;
pub mod workdir;

pub use api::{ClusterApiClient, DIGEST_HEADER, QueueProbe, message_digest};
pub use case::{DRAIN_TIMEOUT, FunctionalTestCase};
pub use cluster::{
    ClusterConfig, ClusterController, ClusterState, ExitCodePolicy, verify_clean_exit,
    wait_for_empty_queue,
};
pub use config::{ConfigFile, EnvParser, test_verbosity};
pub use error::{ExitFailure, HarnessError, HarnessResult};
pub use fs_item::{ExpectedDir, ExpectedFile, FileContent, FsItem, TreeError};
pub use process::{
    ExitRecord, ProcessHandle, ProcessState, Role, Termination,
    platform_allows_exit_code_on_forced_kill,
};
pub use spawner::{BinarySpawner, ServiceSpawner, SpawnRequest};
pub use status::{ExpectedOutcome, StatusDiscrepancy, UnknownKeys, diff_status};
pub use tree::{
    EntryKind, MatchResult, Mismatch, MismatchKind, VerifyPolicy, verify_directory_contents,
    verify_tree, verify_tree_all,
};
pub use workdir::WorkDir;
