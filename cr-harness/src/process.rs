//! Handles for the OS processes backing cluster roles.
//!
//! A handle moves `Running -> Terminating -> Exited`. The exit code exists
//! only once the handle is `Exited`. Termination is split into
//! [`ProcessHandle::signal_terminate`] and [`ProcessHandle::await_exit`] so
//! a controller can signal every process before waiting on any of them.

use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Role a process plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Coordinator,
    Worker(usize),
}

impl Role {
    /// Value passed to the service binary's `--role` flag.
    pub fn cli_name(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Worker(_) => "worker",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Worker(index) => write!(f, "worker-{index}"),
        }
    }
}

/// How a process came to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited before the harness asked it to stop.
    SelfExited,
    /// Exited after a graceful termination request.
    Signaled,
    /// Killed outright, either after the grace period or because the
    /// platform has no graceful request.
    Killed,
}

impl Termination {
    /// True when the harness caused the exit.
    pub fn by_harness(&self) -> bool {
        !matches!(self, Self::SelfExited)
    }
}

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Terminating,
    Exited { code: i32, termination: Termination },
}

/// Snapshot of a handle's outcome, returned by termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pub role: Role,
    pub url: String,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub termination: Option<Termination>,
    pub error: Option<String>,
}

/// Whether forcibly terminating a process still lets the OS report a clean
/// exit code.
///
/// On Windows termination is `TerminateProcess`, which always yields a
/// non-zero code, so exit codes of processes the harness stopped carry no
/// information there.
pub fn platform_allows_exit_code_on_forced_kill() -> bool {
    !cfg!(windows)
}

/// One spawned service process.
#[derive(Debug)]
pub struct ProcessHandle {
    role: Role,
    url: String,
    pid: u32,
    state: ProcessState,
    pending: Termination,
    last_error: Option<String>,
    child: Child,
}

impl ProcessHandle {
    pub fn new(role: Role, url: impl Into<String>, child: Child) -> Self {
        Self {
            role,
            url: url.into(),
            pid: child.id(),
            state: ProcessState::Running,
            pending: Termination::SelfExited,
            last_error: None,
            child,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Exit code; `None` until the handle is `Exited`.
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            ProcessState::Exited { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_exited(&self) -> bool {
        matches!(self.state, ProcessState::Exited { .. })
    }

    /// Check whether the process is still alive (non-blocking).
    pub fn is_running(&mut self) -> bool {
        self.poll_exit();
        !self.is_exited()
    }

    /// Ask the process to stop. No-op once the handle has exited.
    pub fn signal_terminate(&mut self) -> HarnessResult<()> {
        self.poll_exit();
        if self.is_exited() || self.state == ProcessState::Terminating {
            return Ok(());
        }

        self.state = ProcessState::Terminating;
        info!(role = %self.role, pid = self.pid, "Terminating process");

        let result = self.send_terminate();
        if let Err(err) = &result {
            warn!(role = %self.role, pid = self.pid, error = %err, "Termination signal failed");
            self.last_error = Some(err.to_string());
        }
        result
    }

    /// Wait for the process to exit, escalating to a hard kill once `grace`
    /// elapses.
    pub fn await_exit(&mut self, grace: Duration) -> HarnessResult<()> {
        let deadline = Instant::now() + grace;
        loop {
            self.poll_exit();
            if self.is_exited() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(
            role = %self.role,
            pid = self.pid,
            "Process still alive after {:?}, killing",
            grace
        );
        self.pending = Termination::Killed;
        if let Err(err) = self.child.kill() {
            // The process may have exited between the last poll and the kill.
            debug!(role = %self.role, error = %err, "Kill failed");
        }

        match self.child.wait() {
            Ok(status) => {
                self.record_exit(status);
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(format!("wait failed: {err}"));
                Err(HarnessError::Io(err))
            }
        }
    }

    /// Signal and wait in one step.
    pub fn terminate(&mut self, grace: Duration) -> ExitRecord {
        let _ = self.signal_terminate();
        let _ = self.await_exit(grace);
        self.exit_record()
    }

    pub fn exit_record(&self) -> ExitRecord {
        let (exit_code, termination) = match self.state {
            ProcessState::Exited { code, termination } => (Some(code), Some(termination)),
            _ => (None, None),
        };
        ExitRecord {
            role: self.role,
            url: self.url.clone(),
            pid: self.pid,
            exit_code,
            termination,
            error: self.last_error.clone(),
        }
    }

    fn poll_exit(&mut self) {
        if self.is_exited() {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => self.record_exit(status),
            Ok(None) => {}
            Err(err) => {
                debug!(role = %self.role, error = %err, "try_wait failed");
            }
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        let code = exit_code_from_status(status);
        let termination = self.pending;
        debug!(
            role = %self.role,
            pid = self.pid,
            code,
            ?termination,
            "Process exited"
        );
        self.state = ProcessState::Exited { code, termination };
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> HarnessResult<()> {
        self.pending = Termination::Signaled;
        let output = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(self.pid.to_string())
            .output()
            .map_err(|err| HarnessError::SignalFailed {
                role: self.role,
                pid: self.pid,
                message: err.to_string(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        // A process that exited after the last poll makes `kill` fail; that is
        // not a failure to terminate it.
        self.poll_exit();
        if self.is_exited() {
            return Ok(());
        }
        Err(HarnessError::SignalFailed {
            role: self.role,
            pid: self.pid,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> HarnessResult<()> {
        self.pending = Termination::Killed;
        self.child.kill().map_err(|err| HarnessError::SignalFailed {
            role: self.role,
            pid: self.pid,
            message: err.to_string(),
        })
    }
}

/// Exit code of a finished process. Death by signal N maps to `128 + N`,
/// matching shell conventions.
pub fn exit_code_from_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
