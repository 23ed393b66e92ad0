//! # Startup Configuration
//!
//! Read once at startup, never watched. The core treats these values as
//! constructor parameters; nothing here is consulted on the hot path.
//!
//! ```toml
//! num_stages = 3
//!
//! [threads]
//! allow_threads = true
//! stack_size = 1048576
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Pipeline settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Initial stage count. 1 disables pipelining.
    pub num_stages: usize,
    /// Thread creation settings.
    pub threads: ThreadConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_stages: 1,
            threads: ThreadConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file can't be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.num_stages == 0 {
            return Err(ConfigError::Invalid(
                "num_stages must be at least 1".to_string(),
            ));
        }
        self.threads.validate()
    }
}

/// Thread creation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadConfig {
    /// When false, [`Thread::spawn`](crate::sync::Thread::spawn) refuses to
    /// start threads and callers fall back to running work inline.
    pub allow_threads: bool,
    /// Stack size for spawned threads. `None` keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            allow_threads: true,
            stack_size: None,
        }
    }
}

impl ThreadConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a zero stack size.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.stack_size == Some(0) {
            return Err(ConfigError::Invalid(
                "threads.stack_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
