//! Per-role temporary working directories.
//!
//! Services write logs and build artifacts under their working directory
//! until they exit, so release is an explicit step of teardown rather than a
//! side effect of dropping the handle. [`WorkDir::release`] removes the
//! directory at most once; later calls report that nothing was left to do.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::HarnessResult;
use crate::process::Role;

#[derive(Debug)]
pub struct WorkDir {
    role: Role,
    path: PathBuf,
    dir: Option<TempDir>,
}

impl WorkDir {
    /// Create a fresh directory for `role`, under `parent` or the system
    /// temp dir.
    pub fn create(role: Role, parent: Option<&Path>) -> HarnessResult<Self> {
        let prefix = format!("cr-{role}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!(%role, path = %path.display(), "Created working directory");
        Ok(Self {
            role,
            path,
            dir: Some(dir),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the directory. Returns `Ok(true)` if this call removed it and
    /// `Ok(false)` if it had already been released.
    pub fn release(&mut self) -> HarnessResult<bool> {
        match self.dir.take() {
            Some(dir) => {
                debug!(role = %self.role, path = %self.path.display(), "Removing working directory");
                dir.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.dir.is_some() {
            warn!(
                role = %self.role,
                path = %self.path.display(),
                "Working directory was never released; removing on drop"
            );
        }
    }
}
