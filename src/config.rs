//! Harness configuration.
//!
//! Configuration resolves in this order: an explicit [`HarnessConfig`]
//! installed with [`crate::harness::configure`], otherwise the environment
//! (`SYNCFACT_PORTABLE_THREAD`, `SYNCFACT_STACK_SIZE`,
//! `SYNCFACT_CONTEXT_PREFIX`) layered over the defaults. With the
//! `config-file` feature a TOML file can be loaded as well.
//!
//! The active configuration is fixed the first time the portable context is
//! started; installing another one afterwards fails with
//! [`ConfigError::AlreadyInitialized`].

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Default name of the shared portable loop thread.
pub const DEFAULT_PORTABLE_THREAD: &str = "syncfact-portable";

/// Default prefix for loops created through `create_context`.
pub const DEFAULT_CONTEXT_PREFIX: &str = "syncfact-context";

/// Smallest accepted loop thread stack.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Environment variable overriding the portable loop thread name.
pub const ENV_PORTABLE_THREAD: &str = "SYNCFACT_PORTABLE_THREAD";
/// Environment variable overriding the loop thread stack size (bytes).
pub const ENV_STACK_SIZE: &str = "SYNCFACT_STACK_SIZE";
/// Environment variable overriding the `create_context` thread prefix.
pub const ENV_CONTEXT_PREFIX: &str = "SYNCFACT_CONTEXT_PREFIX";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable or field held an unusable value.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Variable or field name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// File path.
        path: String,
        /// OS error text.
        message: String,
    },
    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A configuration is already active.
    #[error("harness configuration is already initialized")]
    AlreadyInitialized,
    /// A loop thread name is empty.
    #[error("loop thread name must not be empty")]
    EmptyThreadName,
    /// A loop stack size is below [`MIN_STACK_SIZE`].
    #[error("loop stack size {size} is below the minimum of {min} bytes")]
    StackTooSmall {
        /// Requested size.
        size: usize,
        /// Minimum accepted size.
        min: usize,
    },
}

/// Settings for one message loop thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// OS thread name.
    pub thread_name: String,
    /// OS thread stack size in bytes; platform default when `None`.
    pub stack_size: Option<usize>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_PORTABLE_THREAD.to_owned(),
            stack_size: None,
        }
    }
}

impl LoopConfig {
    /// Creates a config with the given thread name.
    #[must_use]
    pub fn named(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            stack_size: None,
        }
    }

    /// Sets the stack size.
    #[must_use]
    pub const fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Checks the thread name and stack size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        if let Some(size) = self.stack_size
            && size < MIN_STACK_SIZE
        {
            return Err(ConfigError::StackTooSmall {
                size,
                min: MIN_STACK_SIZE,
            });
        }
        Ok(())
    }
}

/// Process-wide harness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// The shared portable loop.
    pub portable: LoopConfig,
    /// Thread-name prefix for loops handed out by `create_context`.
    pub context_thread_prefix: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            portable: LoopConfig::default(),
            context_thread_prefix: DEFAULT_CONTEXT_PREFIX.to_owned(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, which maps a variable name to its
    /// value.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(name) = lookup(ENV_PORTABLE_THREAD) {
            config.portable.thread_name = name;
        }
        if let Some(raw) = lookup(ENV_STACK_SIZE) {
            let size = raw
                .trim()
                .parse::<usize>()
                .map_err(|err| ConfigError::InvalidValue {
                    key: ENV_STACK_SIZE,
                    value: raw.clone(),
                    reason: err.to_string(),
                })?;
            config.portable.stack_size = Some(size);
        }
        if let Some(prefix) = lookup(ENV_CONTEXT_PREFIX) {
            config.context_thread_prefix = prefix;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    #[cfg(feature = "config-file")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks every loop setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.portable.validate()?;
        if self.context_thread_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "context_thread_prefix",
                value: self.context_thread_prefix.clone(),
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    /// Loop settings for the `index`-th context made by `create_context`.
    #[must_use]
    pub fn context_loop(&self, index: usize) -> LoopConfig {
        LoopConfig {
            thread_name: format!("{}-{index}", self.context_thread_prefix),
            stack_size: self.portable.stack_size,
        }
    }
}

static ACTIVE: OnceLock<HarnessConfig> = OnceLock::new();

/// Installs `config` as the process configuration.
pub(crate) fn install(config: HarnessConfig) -> Result<(), ConfigError> {
    config.validate()?;
    ACTIVE
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)
}

/// Returns the process configuration, fixing it from the environment on
/// first use.
pub(crate) fn active() -> &'static HarnessConfig {
    ACTIVE.get_or_init(|| match HarnessConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            crate::tracing_compat::warn!(error = %err, "ignoring invalid harness environment");
            HarnessConfig::default()
        }
    })
}
