//! Store configuration.

use std::env;
use thiserror::Error;

/// Environment variable overriding [`StoreConfig::worker_name_prefix`]
pub const ENV_WORKER_PREFIX: &str = "FLOWSTORE_WORKER_PREFIX";

/// Environment variable overriding [`StoreConfig::worker_stack_size`] (bytes)
pub const ENV_WORKER_STACK_SIZE: &str = "FLOWSTORE_WORKER_STACK_SIZE";

/// Environment variable overriding [`StoreConfig::isolate_observer_panics`]
pub const ENV_ISOLATE_OBSERVER_PANICS: &str = "FLOWSTORE_ISOLATE_OBSERVER_PANICS";

/// Smallest worker stack size accepted by [`StoreConfig::validate`]
pub const MIN_WORKER_STACK_SIZE: usize = 64 * 1024;

/// Errors from loading or validating a [`StoreConfig`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("invalid value `{value}` for {var}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Raw value found
        value: String,
    },

    /// The configuration is internally inconsistent
    #[error("invalid store configuration: {0}")]
    Validation(String),
}

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use flowstore_runtime::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_worker_stack_size(Some(256 * 1024))
///     .with_isolate_observer_panics(false);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Prefix of worker thread names; a worker is named `<prefix>-<store key>`
    pub worker_name_prefix: String,
    /// Stack size of the worker thread, platform default when `None`
    pub worker_stack_size: Option<usize>,
    /// Catch observer panics instead of letting them poison the store
    pub isolate_observer_panics: bool,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub fn new(
        worker_name_prefix: impl Into<String>,
        worker_stack_size: Option<usize>,
        isolate_observer_panics: bool,
    ) -> Self {
        Self {
            worker_name_prefix: worker_name_prefix.into(),
            worker_stack_size,
            isolate_observer_panics,
        }
    }

    /// Load configuration from `FLOWSTORE_*` environment variables
    ///
    /// Unset variables keep their default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the result
    /// fails [`StoreConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Same as [`StoreConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(prefix) = lookup(ENV_WORKER_PREFIX) {
            config.worker_name_prefix = prefix;
        }

        if let Some(raw) = lookup(ENV_WORKER_STACK_SIZE) {
            let size = raw.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                var: ENV_WORKER_STACK_SIZE,
                value: raw.clone(),
            })?;
            config.worker_stack_size = Some(size);
        }

        if let Some(raw) = lookup(ENV_ISOLATE_OBSERVER_PANICS) {
            config.isolate_observer_panics = parse_flag(&raw).ok_or(ConfigError::InvalidValue {
                var: ENV_ISOLATE_OBSERVER_PANICS,
                value: raw.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the worker thread name prefix
    #[must_use]
    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    /// Set the worker stack size
    #[must_use]
    pub const fn with_worker_stack_size(mut self, size: Option<usize>) -> Self {
        self.worker_stack_size = size;
        self
    }

    /// Enable or disable observer panic isolation
    #[must_use]
    pub const fn with_isolate_observer_panics(mut self, isolate: bool) -> Self {
        self.isolate_observer_panics = isolate;
        self
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an empty thread name prefix or
    /// a stack size below [`MIN_WORKER_STACK_SIZE`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_name_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "worker_name_prefix can't be empty".to_string(),
            ));
        }

        if let Some(size) = self.worker_stack_size.filter(|size| *size < MIN_WORKER_STACK_SIZE) {
            return Err(ConfigError::Validation(format!(
                "worker_stack_size {size} is below the minimum of {MIN_WORKER_STACK_SIZE} bytes"
            )));
        }

        Ok(())
    }

    /// Worker thread name; NUL bytes are not allowed in thread names
    pub(crate) fn thread_name(&self, key: &str) -> String {
        format!("{}-{key}", self.worker_name_prefix).replace('\0', "_")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            worker_name_prefix: "flowstore".to_string(),
            worker_stack_size: None,
            isolate_observer_panics: true,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |var| vars.get(var).map(|value| (*value).to_string())
    }

    #[test]
    fn defaults() {
        let config = StoreConfig::default();

        assert_eq!(config.worker_name_prefix, "flowstore");
        assert_eq!(config.worker_stack_size, None);
        assert!(config.isolate_observer_panics);
        assert_eq!(config.thread_name("users.store"), "flowstore-users.store");
        assert_eq!(config.thread_name("a\0b"), "flowstore-a_b");
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_WORKER_PREFIX, "app"),
            (ENV_WORKER_STACK_SIZE, "131072"),
            (ENV_ISOLATE_OBSERVER_PANICS, "off"),
        ]))
        .unwrap();

        assert_eq!(config, StoreConfig::new("app", Some(131_072), false));
    }

    #[test]
    fn unparsable_values_are_reported() {
        let error = StoreConfig::from_lookup(lookup(&[(ENV_WORKER_STACK_SIZE, "big")])).unwrap_err();
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                var: ENV_WORKER_STACK_SIZE,
                value: "big".to_string()
            }
        );

        let error = StoreConfig::from_lookup(lookup(&[(ENV_ISOLATE_OBSERVER_PANICS, "maybe")])).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(StoreConfig::default().with_worker_name_prefix(" ").validate().is_err());
        assert!(StoreConfig::default().with_worker_stack_size(Some(1024)).validate().is_err());
        assert!(StoreConfig::from_lookup(lookup(&[(ENV_WORKER_PREFIX, "")])).is_err());
    }
}
