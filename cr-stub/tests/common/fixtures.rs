use std::path::PathBuf;
use std::time::Duration;

use cr_harness::{BinarySpawner, ClusterConfig, Role};
use serde_json::json;
use tempfile::TempDir;

/// Build ids in the canned fixture set written by [`StubCluster`].
pub const SUCCEEDED_BUILD: u64 = 1;
pub const FAILED_BUILD: u64 = 2;
pub const CANCELED_BUILD: u64 = 3;

/// Spawner and config for a stub cluster, plus the scratch space they use.
pub struct StubCluster {
    pub scratch: TempDir,
    pub spawner: BinarySpawner,
}

impl StubCluster {
    pub fn new() -> Self {
        Self::with_queue(Vec::new())
    }

    /// Fixture set whose queue never drains.
    pub fn with_queue(queue: Vec<serde_json::Value>) -> Self {
        crate::test_log!("FIXTURE: Writing stub fixtures");

        let scratch = TempDir::new().expect("Failed to create temp dir");
        let fixtures_path = scratch.path().join("fixtures.json");
        let fixtures = json!({
            "builds": {
                "1": {
                    "status": {"result": "NO_FAILURES", "status": "FINISHED"},
                    "artifacts": {
                        "clusterrunner_exit_code": "0\n",
                        "artifact_0_0/clusterrunner_console_output": "hello\n",
                        "artifact_0_0/clusterrunner_exit_code": "0\n"
                    }
                },
                "2": {
                    "status": {"result": "FAILURE", "status": "FINISHED"},
                    "artifacts": {"clusterrunner_exit_code": "1\n"}
                },
                "3": {
                    "status": {"result": "FAILURE", "status": "CANCELED"}
                }
            },
            "queue": queue
        });
        std::fs::write(&fixtures_path, fixtures.to_string()).expect("Failed to write fixtures");

        let spawner = BinarySpawner::new(env!("CARGO_BIN_EXE_cr-stub"))
            .role_args(Role::Coordinator, ["--fixtures".into(), fixtures_path.into_os_string()]);

        Self {
            scratch,
            spawner,
        }
    }

    /// Extra flags for one role, e.g. a non-zero exit code for a worker.
    pub fn role_args(mut self, role: Role, args: &[&str]) -> Self {
        self.spawner = self.spawner.role_args(role, args.iter().copied());
        self
    }

    /// Config with short timings, working dirs under the scratch dir.
    pub fn config(&self, num_workers: usize) -> ClusterConfig {
        ClusterConfig::new("testsecret")
            .with_num_workers(num_workers)
            .with_work_root(self.scratch.path().join("work"))
            .with_startup_timeout(Duration::from_secs(30))
            .with_termination_grace(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(50))
    }

    pub fn work_root(&self) -> PathBuf {
        self.scratch.path().join("work")
    }

    /// Working directories still present under the work root.
    pub fn leftover_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.work_root()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
