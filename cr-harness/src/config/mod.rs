//! Harness configuration.
//!
//! - Environment variable parsing with source tracking (`CR_*`)
//! - Per-role TOML configuration files written into working directories

pub mod env;
pub mod file;
pub mod source;

pub use env::{EnvError, EnvParser, test_verbosity};
pub use file::{BASE_CONFIG_SECTION, CONFIG_FILE_MODE, ConfigError, ConfigFile, create_test_config_file};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
