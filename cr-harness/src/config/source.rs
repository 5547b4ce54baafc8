//! Where a configuration value came from.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Read from an environment variable.
    Environment,
}

/// A value together with the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Environment variable name, when the value came from one.
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var.into()),
        }
    }

    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == ConfigSource::Default
    }
}
