//! Per-role service configuration files.
//!
//! Each role gets its own copy of the service configuration, written into its
//! working directory. The template it is copied from is never modified.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

/// Unix permissions for written configuration files. They carry the secret.
pub const CONFIG_FILE_MODE: u32 = 0o600;

/// Section holding the service's general settings, including the secret.
pub const BASE_CONFIG_SECTION: &str = "general";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Section [{0}] is not a table")]
    SectionNotTable(String),

    #[error("Refusing to write over the config template at {}", .0.display())]
    WouldOverwriteTemplate(PathBuf),
}

/// A TOML configuration file held in memory until [`ConfigFile::save`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    table: toml::Table,
}

impl ConfigFile {
    /// Start a config at `dest`, seeded from `template` when given.
    pub fn from_template(template: Option<&Path>, dest: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let dest = dest.into();
        let table = match template {
            Some(template) => {
                if same_file(template, &dest) {
                    return Err(ConfigError::WouldOverwriteTemplate(template.to_path_buf()));
                }
                Self::load(template)?.table
            }
            None => toml::Table::new(),
        };
        Ok(Self { path: dest, table })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let table = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set `key` in `section`, creating the section if needed.
    pub fn write_value(
        &mut self,
        key: &str,
        value: impl Into<toml::Value>,
        section: &str,
    ) -> Result<(), ConfigError> {
        let entry = self
            .table
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(table) = entry else {
            return Err(ConfigError::SectionNotTable(section.to_string()));
        };
        table.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn read_value(&self, key: &str, section: &str) -> Option<&toml::Value> {
        self.table.get(section)?.as_table()?.get(key)
    }

    /// Write the file, restricting its permissions on unix.
    pub fn save(&self) -> Result<(), ConfigError> {
        let contents = toml::to_string(&self.table)?;
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&self.path, contents).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(CONFIG_FILE_MODE))
                .map_err(io_err)?;
        }
        debug!(path = %self.path.display(), "Wrote config file");
        Ok(())
    }
}

/// Write a config file for one test run: the template's contents, then
/// `overrides` and the secret in the [`BASE_CONFIG_SECTION`] section.
pub fn create_test_config_file(
    template: Option<&Path>,
    dest: &Path,
    overrides: &BTreeMap<String, toml::Value>,
    secret: &SecretString,
) -> Result<PathBuf, ConfigError> {
    let mut conf = ConfigFile::from_template(template, dest)?;
    for (key, value) in overrides {
        conf.write_value(key, value.clone(), BASE_CONFIG_SECTION)?;
    }
    conf.write_value("secret", secret.expose_secret(), BASE_CONFIG_SECTION)?;
    conf.save()?;
    Ok(dest.to_path_buf())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
