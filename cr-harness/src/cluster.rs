//! Cluster lifecycle: start, drain, terminate, verify.
//!
//! A controller owns one coordinator, a fixed set of workers, and one working
//! directory per role. State moves `Starting -> Running -> Draining ->
//! Stopped`; draining is best-effort, so `Stopped` is reached whether or not
//! the queue emptied.
//!
//! Termination signals every process before waiting on any of them, then
//! waits on all of them concurrently, so the total wait is bounded by one
//! grace period rather than one per process.

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::api::{ClusterApiClient, QueueProbe};
use crate::config::{EnvParser, create_test_config_file, test_verbosity};
use crate::error::{ExitFailure, HarnessError, HarnessResult};
use crate::process::{ExitRecord, ProcessHandle, Role, platform_allows_exit_code_on_forced_kill};
use crate::spawner::{ServiceSpawner, SpawnRequest};
use crate::workdir::WorkDir;

const CONFIG_FILE_NAME: &str = "clusterrunner.toml";
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Options for standing up a cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub num_workers: usize,
    pub secret: SecretString,
    /// Let service processes write to the test's stdout/stderr.
    pub verbose: bool,
    pub host: String,
    /// TOML file copied into each role's working directory.
    pub conf_template: Option<PathBuf>,
    /// Values written into the `[general]` section of each copy.
    pub conf_overrides: BTreeMap<String, toml::Value>,
    pub startup_timeout: Duration,
    /// How long a process gets to exit after the termination request.
    pub termination_grace: Duration,
    pub poll_interval: Duration,
    /// Parent for the working directories; system temp dir when unset.
    pub work_root: Option<PathBuf>,
}

impl ClusterConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            num_workers: 1,
            secret: SecretString::from(secret.into()),
            verbose: false,
            host: "127.0.0.1".to_string(),
            conf_template: None,
            conf_overrides: BTreeMap::new(),
            startup_timeout: Duration::from_secs(30),
            termination_grace: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            work_root: None,
        }
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_conf_template(mut self, template: impl Into<PathBuf>) -> Self {
        self.conf_template = Some(template.into());
        self
    }

    pub fn with_conf_override(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.conf_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Apply `CR_VERBOSE` and `CR_STARTUP_TIMEOUT_SECS`.
    pub fn apply_env(mut self) -> Self {
        self.verbose = self.verbose || test_verbosity();

        let mut env = EnvParser::new();
        let startup = env.get_u64_range("STARTUP_TIMEOUT_SECS", self.startup_timeout.as_secs(), 1, 3600);
        if !startup.is_default() {
            self.startup_timeout = Duration::from_secs(startup.value);
        }
        for err in env.errors() {
            warn!(error = %err, "Ignoring invalid environment setting");
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Which exit codes count as evidence about a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodePolicy {
    /// When false, records of processes ended by the harness are skipped.
    pub forced_kill_reports_exit_code: bool,
}

impl ExitCodePolicy {
    pub fn for_current_platform() -> Self {
        Self {
            forced_kill_reports_exit_code: platform_allows_exit_code_on_forced_kill(),
        }
    }
}

/// Check that every process exited with code 0.
///
/// Processes that exited on their own are always checked. A record without
/// an exit code is a failure.
pub fn verify_clean_exit(records: &[ExitRecord], policy: ExitCodePolicy) -> HarnessResult<()> {
    const CLEAN_EXIT_CODE: i32 = 0;

    let failures: Vec<ExitFailure> = records
        .iter()
        .filter(|record| {
            let ended_by_harness = record.termination.is_some_and(|t| t.by_harness());
            policy.forced_kill_reports_exit_code || !ended_by_harness
        })
        .filter(|record| record.exit_code != Some(CLEAN_EXIT_CODE))
        .map(|record| ExitFailure {
            role: record.role,
            url: record.url.clone(),
            actual: record.exit_code,
            expected: CLEAN_EXIT_CODE,
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::ExitCodeMismatch(failures))
    }
}

/// Poll `probe` until the queue is empty.
///
/// Returns [`HarnessError::Timeout`] only once `timeout` has fully elapsed.
/// Each probe is limited to the time still left, so an unresponsive
/// coordinator cannot stretch the wait. Probe errors count as a non-empty
/// queue.
pub fn wait_for_empty_queue(
    probe: &dyn QueueProbe,
    timeout: Duration,
    interval: Duration,
) -> HarnessResult<()> {
    const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(1);

    let interval = interval.max(Duration::from_millis(1));
    let started = Instant::now();
    loop {
        let remaining = timeout.saturating_sub(started.elapsed()).max(MIN_PROBE_TIMEOUT);
        match probe.queue_depth(remaining) {
            Ok(0) => return Ok(()),
            Ok(depth) => debug!(depth, "Queue not empty yet"),
            Err(err) => debug!(error = %err, "Queue probe failed"),
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(HarnessError::Timeout(timeout));
        }
        std::thread::sleep(interval.min(timeout - elapsed));
    }
}

/// A running cluster owned by one test.
#[derive(Debug)]
pub struct ClusterController {
    state: ClusterState,
    coordinator: ProcessHandle,
    workers: BTreeMap<usize, ProcessHandle>,
    work_dirs: BTreeMap<Role, WorkDir>,
    api: ClusterApiClient,
    config: ClusterConfig,
}

impl ClusterController {
    /// Spawn the coordinator and workers and wait until each answers its
    /// health probe. On failure everything already started is torn down.
    pub fn start(config: ClusterConfig, spawner: &dyn ServiceSpawner) -> HarnessResult<Self> {
        info!(num_workers = config.num_workers, "Starting cluster");

        let mut coordinator_dir = WorkDir::create(Role::Coordinator, config.work_root.as_deref())?;
        let coordinator = match spawn_role(&config, spawner, &coordinator_dir, None) {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(release_err) = coordinator_dir.release() {
                    warn!(error = %release_err, "Failed to release coordinator working directory");
                }
                return Err(err);
            }
        };

        let mut work_dirs = BTreeMap::new();
        work_dirs.insert(Role::Coordinator, coordinator_dir);
        let mut cluster = Self::assemble(config, coordinator, BTreeMap::new(), work_dirs, ClusterState::Starting);

        match cluster.start_workers(spawner).and_then(|()| cluster.wait_until_healthy()) {
            Ok(()) => {
                cluster.state = ClusterState::Running;
                info!(coordinator = %cluster.coordinator.url(), "Cluster running");
                Ok(cluster)
            }
            Err(err) => {
                warn!(error = %err, "Cluster failed to start, tearing down");
                cluster.terminate_all();
                if let Err(release_err) = cluster.release_work_dirs() {
                    warn!(error = %release_err, "Failed to release working directories");
                }
                Err(err)
            }
        }
    }

    /// Build a controller around processes that are already running.
    ///
    /// Every handle needs a matching entry in `work_dirs` only if the caller
    /// wants the controller to release it.
    pub fn from_parts(
        config: ClusterConfig,
        coordinator: ProcessHandle,
        workers: BTreeMap<usize, ProcessHandle>,
        work_dirs: BTreeMap<Role, WorkDir>,
    ) -> Self {
        Self::assemble(config, coordinator, workers, work_dirs, ClusterState::Running)
    }

    fn assemble(
        config: ClusterConfig,
        coordinator: ProcessHandle,
        workers: BTreeMap<usize, ProcessHandle>,
        work_dirs: BTreeMap<Role, WorkDir>,
        state: ClusterState,
    ) -> Self {
        let api = ClusterApiClient::new(coordinator.url(), config.secret.clone());
        Self {
            state,
            coordinator,
            workers,
            work_dirs,
            api,
            config,
        }
    }

    fn start_workers(&mut self, spawner: &dyn ServiceSpawner) -> HarnessResult<()> {
        let coordinator_url = self.coordinator.url().to_string();
        for index in 0..self.config.num_workers {
            let role = Role::Worker(index);
            let dir = WorkDir::create(role, self.config.work_root.as_deref())?;
            // Insert before spawning so a failed spawn still releases it.
            let dir = self.work_dirs.entry(role).or_insert(dir);
            let handle = spawn_role(&self.config, spawner, dir, Some(&coordinator_url))?;
            self.workers.insert(index, handle);
        }
        Ok(())
    }

    fn wait_until_healthy(&mut self) -> HarnessResult<()> {
        let deadline = Instant::now() + self.config.startup_timeout;
        let timeout = self.config.startup_timeout;
        let interval = self.config.poll_interval;
        let secret = self.config.secret.clone();

        for handle in std::iter::once(&mut self.coordinator).chain(self.workers.values_mut()) {
            let client = ClusterApiClient::with_timeout(handle.url(), secret.clone(), HEALTH_PROBE_TIMEOUT);
            loop {
                if !handle.is_running() {
                    return Err(HarnessError::ProcessStartFailed(format!(
                        "{} exited with code {:?} during startup",
                        handle.role(),
                        handle.exit_code()
                    )));
                }
                if client.is_healthy() {
                    debug!(role = %handle.role(), url = %handle.url(), "Service healthy");
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(HarnessError::Timeout(timeout));
                }
                std::thread::sleep(interval);
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &ProcessHandle {
        &self.coordinator
    }

    pub fn workers(&self) -> &BTreeMap<usize, ProcessHandle> {
        &self.workers
    }

    /// Client for the coordinator's API.
    pub fn api(&self) -> &ClusterApiClient {
        &self.api
    }

    pub fn work_dir(&self, role: Role) -> HarnessResult<&Path> {
        match self.work_dirs.get(&role) {
            Some(dir) if !dir.is_released() => Ok(dir.path()),
            _ => Err(HarnessError::MissingWorkDir(role)),
        }
    }

    pub fn coordinator_dir(&self) -> HarnessResult<&Path> {
        self.work_dir(Role::Coordinator)
    }

    /// Where the coordinator stores the artifacts of `build_id`.
    pub fn build_artifacts_dir(&self, build_id: u64) -> HarnessResult<PathBuf> {
        Ok(self
            .coordinator_dir()?
            .join("results")
            .join("master")
            .join(build_id.to_string()))
    }

    /// Wait for the coordinator's queue to empty.
    pub fn block_until_queue_empty(&mut self, timeout: Duration) -> HarnessResult<()> {
        if self.state == ClusterState::Running {
            self.state = ClusterState::Draining;
        }
        info!(?timeout, "Waiting for build queue to empty");
        wait_for_empty_queue(&self.api, timeout, self.config.poll_interval)
    }

    /// Terminate every process and report how each one exited.
    ///
    /// Every handle is attempted regardless of failures on others. Calling
    /// this again after every process exited returns the same records.
    pub fn terminate_all(&mut self) -> Vec<ExitRecord> {
        let grace = self.config.termination_grace;

        for handle in self.workers.values_mut().chain(std::iter::once(&mut self.coordinator)) {
            if let Err(err) = handle.signal_terminate() {
                warn!(role = %handle.role(), error = %err, "Failed to request termination");
            }
        }

        let handles: Vec<&mut ProcessHandle> = self
            .workers
            .values_mut()
            .chain(std::iter::once(&mut self.coordinator))
            .collect();
        std::thread::scope(|scope| {
            for handle in handles {
                scope.spawn(move || {
                    if let Err(err) = handle.await_exit(grace) {
                        warn!(role = %handle.role(), error = %err, "Failed waiting for exit");
                    }
                });
            }
        });

        self.state = ClusterState::Stopped;
        self.exit_records()
    }

    /// Current record of every handle, coordinator first.
    pub fn exit_records(&self) -> Vec<ExitRecord> {
        std::iter::once(&self.coordinator)
            .chain(self.workers.values())
            .map(ProcessHandle::exit_record)
            .collect()
    }

    /// Remove every working directory. Processes still running are
    /// terminated first. Each directory is removed at most once.
    pub fn release_work_dirs(&mut self) -> HarnessResult<()> {
        let all_exited = self.coordinator.is_exited() && self.workers.values().all(ProcessHandle::is_exited);
        if !all_exited {
            self.terminate_all();
        }

        let mut first_err = None;
        for dir in self.work_dirs.values_mut() {
            if let Err(err) = dir.release() {
                warn!(role = %dir.role(), error = %err, "Failed to remove working directory");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for ClusterController {
    fn drop(&mut self) {
        let released = self.work_dirs.values().all(WorkDir::is_released);
        if self.state == ClusterState::Stopped && released {
            return;
        }
        warn!("Cluster dropped without teardown; terminating");
        self.terminate_all();
        let _ = self.release_work_dirs();
    }
}

fn spawn_role(
    config: &ClusterConfig,
    spawner: &dyn ServiceSpawner,
    dir: &WorkDir,
    coordinator_url: Option<&str>,
) -> HarnessResult<ProcessHandle> {
    let role = dir.role();
    let config_file = create_test_config_file(
        config.conf_template.as_deref(),
        &dir.path().join(CONFIG_FILE_NAME),
        &config.conf_overrides,
        &config.secret,
    )?;
    let port = free_port(&config.host)?;
    let url = format!("http://{}:{}", config.host, port);

    let request = SpawnRequest {
        role,
        host: &config.host,
        port,
        base_dir: dir.path(),
        config_file: &config_file,
        coordinator_url,
        verbose: config.verbose,
    };
    let child = spawner.spawn(&request)?;
    Ok(ProcessHandle::new(role, url, child))
}

/// Ask the OS for a port that is free right now.
fn free_port(host: &str) -> HarnessResult<u16> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Termination;
    use std::cell::Cell;

    fn record(role: Role, exit_code: Option<i32>, termination: Option<Termination>) -> ExitRecord {
        ExitRecord {
            role,
            url: format!("http://127.0.0.1:4300{}", matches!(role, Role::Worker(_)) as u8),
            pid: 1,
            exit_code,
            termination,
            error: None,
        }
    }

    #[test]
    fn test_clean_exit_passes() {
        let records = vec![
            record(Role::Coordinator, Some(0), Some(Termination::Signaled)),
            record(Role::Worker(0), Some(0), Some(Termination::Signaled)),
        ];
        verify_clean_exit(&records, ExitCodePolicy { forced_kill_reports_exit_code: true }).unwrap();
    }

    #[test]
    fn test_nonzero_worker_exit_fails_with_role_and_code() {
        let records = vec![
            record(Role::Coordinator, Some(0), Some(Termination::Signaled)),
            record(Role::Worker(0), Some(3), Some(Termination::Signaled)),
        ];
        let err = verify_clean_exit(&records, ExitCodePolicy { forced_kill_reports_exit_code: true })
            .unwrap_err();
        match &err {
            HarnessError::ExitCodeMismatch(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].role, Role::Worker(0));
                assert_eq!(failures[0].actual, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("http://127.0.0.1:43001"));
    }

    #[test]
    fn test_policy_skips_only_harness_ended_processes() {
        let policy = ExitCodePolicy { forced_kill_reports_exit_code: false };
        let records = vec![
            record(Role::Coordinator, Some(1), Some(Termination::Killed)),
            record(Role::Worker(0), Some(1), Some(Termination::Signaled)),
        ];
        verify_clean_exit(&records, policy).unwrap();

        let records = vec![record(Role::Worker(0), Some(3), Some(Termination::SelfExited))];
        assert!(verify_clean_exit(&records, policy).is_err());
    }

    #[test]
    fn test_policy_checks_self_exited_alongside_killed_worker() {
        let policy = ExitCodePolicy { forced_kill_reports_exit_code: false };
        let records = vec![
            record(Role::Coordinator, Some(2), Some(Termination::SelfExited)),
            record(Role::Worker(0), Some(1), Some(Termination::Killed)),
        ];
        match verify_clean_exit(&records, policy).unwrap_err() {
            HarnessError::ExitCodeMismatch(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].role, Role::Coordinator);
                assert_eq!(failures[0].actual, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_exit_code_fails() {
        let records = vec![record(Role::Coordinator, None, None)];
        let policy = ExitCodePolicy::for_current_platform();
        assert!(matches!(
            verify_clean_exit(&records, policy),
            Err(HarnessError::ExitCodeMismatch(_))
        ));
    }

    struct FixedDepth {
        depth: usize,
        calls: Cell<usize>,
    }

    impl QueueProbe for FixedDepth {
        fn queue_depth(&self, _timeout: Duration) -> HarnessResult<usize> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.depth)
        }
    }

    struct DrainsAfter {
        calls: Cell<usize>,
        after: usize,
    }

    impl QueueProbe for DrainsAfter {
        fn queue_depth(&self, _timeout: Duration) -> HarnessResult<usize> {
            let calls = self.calls.get() + 1;
            self.calls.set(calls);
            if calls > self.after {
                Ok(0)
            } else {
                Err(HarnessError::Api {
                    url: "http://127.0.0.1:1/v1/queue".to_string(),
                    message: "connection refused".to_string(),
                })
            }
        }
    }

    #[test]
    fn test_zero_timeout_probes_once() {
        let probe = FixedDepth { depth: 2, calls: Cell::new(0) };
        let err = wait_for_empty_queue(&probe, Duration::ZERO, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, HarnessError::Timeout(_)));
        assert_eq!(probe.calls.get(), 1);
    }

    #[test]
    fn test_timeout_never_returns_early() {
        let probe = FixedDepth { depth: 1, calls: Cell::new(0) };
        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        let err = wait_for_empty_queue(&probe, timeout, Duration::from_millis(30)).unwrap_err();
        assert!(started.elapsed() >= timeout);
        assert!(matches!(err, HarnessError::Timeout(t) if t == timeout));
        assert!(probe.calls.get() > 1);
    }

    #[test]
    fn test_unresponsive_coordinator_does_not_stretch_timeout() {
        // Bound but never accepted: requests hang until the client gives up.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let client = ClusterApiClient::new(url, SecretString::from("testsecret"));

        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        let err = wait_for_empty_queue(&client, timeout, Duration::from_millis(50)).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, HarnessError::Timeout(t) if t == timeout));
        assert!(elapsed >= timeout);
        assert!(elapsed < Duration::from_secs(2), "drain took {elapsed:?} for a {timeout:?} bound");
        drop(listener);
    }

    #[test]
    fn test_empty_queue_returns_immediately() {
        let probe = FixedDepth { depth: 0, calls: Cell::new(0) };
        wait_for_empty_queue(&probe, Duration::from_secs(60), Duration::from_secs(1)).unwrap();
        assert_eq!(probe.calls.get(), 1);
    }

    #[test]
    fn test_probe_errors_keep_polling() {
        let probe = DrainsAfter { calls: Cell::new(0), after: 2 };
        wait_for_empty_queue(&probe, Duration::from_secs(5), Duration::from_millis(5)).unwrap();
        assert_eq!(probe.calls.get(), 3);
    }

    struct RefusingSpawner;

    impl ServiceSpawner for RefusingSpawner {
        fn spawn(&self, request: &SpawnRequest<'_>) -> HarnessResult<std::process::Child> {
            Err(HarnessError::ProcessStartFailed(format!("{} refused", request.role)))
        }
    }

    #[test]
    fn test_coordinator_spawn_failure_releases_its_dir() {
        let root = tempfile::TempDir::new().unwrap();
        let config = ClusterConfig::new("testsecret").with_work_root(root.path());

        let err = ClusterController::start(config, &RefusingSpawner).unwrap_err();
        assert!(matches!(err, HarnessError::ProcessStartFailed(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_config_builder() {
        let config = ClusterConfig::new("testsecret")
            .with_num_workers(3)
            .with_conf_override("log_level", "DEBUG")
            .with_termination_grace(Duration::from_secs(2));
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.conf_overrides["log_level"].as_str(), Some("DEBUG"));
        assert!(!format!("{config:?}").contains("testsecret"));
    }

    #[cfg(unix)]
    mod lifecycle {
        use super::*;
        use crate::process::ProcessState;
        use std::process::{Command, Stdio};

        fn sleeper(role: Role, port: u16) -> ProcessHandle {
            let child = Command::new("sh")
                .arg("-c")
                .arg("exec sleep 30")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .unwrap();
            ProcessHandle::new(role, format!("http://127.0.0.1:{port}"), child)
        }

        fn cluster(num_workers: usize) -> ClusterController {
            let config = ClusterConfig::new("testsecret").with_termination_grace(Duration::from_secs(5));
            let mut workers = BTreeMap::new();
            let mut work_dirs = BTreeMap::new();
            work_dirs.insert(Role::Coordinator, WorkDir::create(Role::Coordinator, None).unwrap());
            for index in 0..num_workers {
                workers.insert(index, sleeper(Role::Worker(index), 43001 + index as u16));
                let role = Role::Worker(index);
                work_dirs.insert(role, WorkDir::create(role, None).unwrap());
            }
            ClusterController::from_parts(config, sleeper(Role::Coordinator, 43000), workers, work_dirs)
        }

        #[test]
        fn test_terminate_all_is_idempotent() {
            let mut cluster = cluster(2);
            let first = cluster.terminate_all();
            assert_eq!(first.len(), 3);
            assert_eq!(first[0].role, Role::Coordinator);
            assert!(first.iter().all(|r| r.exit_code.is_some()));
            assert_eq!(cluster.state(), ClusterState::Stopped);

            let second = cluster.terminate_all();
            assert_eq!(first, second);
            cluster.release_work_dirs().unwrap();
        }

        #[test]
        fn test_release_terminates_running_processes_first() {
            let mut cluster = cluster(1);
            let dir = cluster.coordinator_dir().unwrap().to_path_buf();

            cluster.release_work_dirs().unwrap();
            assert!(matches!(cluster.coordinator().state(), ProcessState::Exited { .. }));
            assert!(!dir.exists());
            assert!(matches!(
                cluster.coordinator_dir(),
                Err(HarnessError::MissingWorkDir(Role::Coordinator))
            ));
            // Second release has nothing left to do.
            cluster.release_work_dirs().unwrap();
        }

        #[test]
        fn test_artifacts_dir_layout() {
            let mut cluster = cluster(0);
            let dir = cluster.build_artifacts_dir(7).unwrap();
            assert!(dir.ends_with("results/master/7"));
            assert!(dir.starts_with(cluster.coordinator_dir().unwrap()));
            cluster.terminate_all();
            cluster.release_work_dirs().unwrap();
        }

        #[test]
        fn test_drop_cleans_up() {
            let cluster = cluster(1);
            let dir = cluster.coordinator_dir().unwrap().to_path_buf();
            drop(cluster);
            assert!(!dir.exists());
        }
    }
}
