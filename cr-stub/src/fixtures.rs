//! Canned builds served by the stub coordinator.
//!
//! A fixture file is JSON of the form:
//!
//! ```json
//! {
//!   "builds": {
//!     "1": {
//!       "status": {"result": "NO_FAILURES", "status": "FINISHED"},
//!       "artifacts": {"clusterrunner_exit_code": "0\n", "artifact_0_0/output.txt": "ok\n"}
//!     }
//!   },
//!   "queue": []
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub builds: BTreeMap<u64, BuildFixture>,
    /// Entries reported by the queue endpoint; never drains.
    #[serde(default)]
    pub queue: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildFixture {
    #[serde(default)]
    pub status: Map<String, Value>,
    /// Relative path -> file contents, written under the build's results dir.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
}

impl Fixtures {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures from {:?}", path))?;
        serde_json::from_str(&contents).with_context(|| format!("Invalid fixtures in {:?}", path))
    }

    /// Status object of `build_id`, with its id filled in.
    pub fn build_status(&self, build_id: u64) -> Option<Value> {
        let build = self.builds.get(&build_id)?;
        let mut status = build.status.clone();
        status.entry("build_id").or_insert_with(|| Value::from(build_id));
        Some(Value::Object(status))
    }

    /// Write every build's artifacts under `<base_dir>/results/master/<id>`.
    pub fn write_artifacts(&self, base_dir: &Path) -> Result<()> {
        for (build_id, build) in &self.builds {
            let build_dir = artifacts_dir(base_dir, *build_id);
            std::fs::create_dir_all(&build_dir)
                .with_context(|| format!("Failed to create {:?}", build_dir))?;

            for (relative, contents) in &build.artifacts {
                let path = build_dir.join(checked_relative(relative)?);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, contents).with_context(|| format!("Failed to write {:?}", path))?;
                debug!(build_id, path = %path.display(), "Wrote artifact");
            }
        }
        Ok(())
    }
}

pub fn artifacts_dir(base_dir: &Path, build_id: u64) -> PathBuf {
    base_dir.join("results").join("master").join(build_id.to_string())
}

fn checked_relative(relative: &str) -> Result<&Path> {
    let path = Path::new(relative);
    if relative.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("Artifact path must be relative and stay inside the build dir: {relative:?}");
    }
    Ok(path)
}
