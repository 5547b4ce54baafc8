//! Starting service processes.
//!
//! How a role's process is launched belongs to the service under test, so
//! the controller only sees the [`ServiceSpawner`] trait. [`BinarySpawner`]
//! covers services that take their role, port, and directories as flags.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::info;

use crate::error::{HarnessError, HarnessResult};
use crate::process::Role;

/// Everything a spawner needs to launch one role.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub role: Role,
    pub host: &'a str,
    pub port: u16,
    /// Working directory owned by this role for the test's duration.
    pub base_dir: &'a Path,
    /// Per-role copy of the service configuration file.
    pub config_file: &'a Path,
    /// Coordinator URL, set for workers.
    pub coordinator_url: Option<&'a str>,
    /// When true the process inherits the test's stdout/stderr.
    pub verbose: bool,
}

/// Launches the process backing one cluster role.
pub trait ServiceSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> HarnessResult<Child>;
}

/// Spawns a service binary with flag-style arguments:
///
/// `<program> --role <coordinator|worker> --host H --port P --base-dir D
/// --config C [--coordinator-url URL] [role args...]`
#[derive(Debug, Clone)]
pub struct BinarySpawner {
    program: PathBuf,
    extra_args: Vec<OsString>,
    role_args: BTreeMap<Role, Vec<OsString>>,
}

impl BinarySpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            role_args: BTreeMap::new(),
        }
    }

    /// Arguments appended for every role.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Arguments appended for one role only.
    pub fn role_args<I, S>(mut self, role: Role, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.role_args
            .entry(role)
            .or_default()
            .extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, request: &SpawnRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--role")
            .arg(request.role.cli_name())
            .arg("--host")
            .arg(request.host)
            .arg("--port")
            .arg(request.port.to_string())
            .arg("--base-dir")
            .arg(request.base_dir)
            .arg("--config")
            .arg(request.config_file)
            .current_dir(request.base_dir);

        if let Some(url) = request.coordinator_url {
            cmd.arg("--coordinator-url").arg(url);
        }
        cmd.args(&self.extra_args);
        if let Some(args) = self.role_args.get(&request.role) {
            cmd.args(args);
        }

        // Nobody reads the services' output; piping it unread would let a
        // chatty service fill the pipe buffer and stall.
        if request.verbose {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl ServiceSpawner for BinarySpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> HarnessResult<Child> {
        info!(
            role = %request.role,
            port = request.port,
            program = %self.program.display(),
            "Spawning service process"
        );
        self.command(request).spawn().map_err(|e| {
            HarnessError::ProcessStartFailed(format!(
                "{} ({}): {}",
                self.program.display(),
                request.role,
                e
            ))
        })
    }
}
