//! # Frame Loop Configuration
//!
//! ```toml
//! stage_names = ["cull", "draw"]
//! target_fps = 60
//! frame_timeout_ms = 1000
//!
//! [pipeline]
//! num_stages = 3
//!
//! [pipeline.threads]
//! allow_threads = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempora_core::{ConfigError, ConfigResult, PipelineConfig};

/// Frame loop settings on top of the pipeline configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameLoopConfig {
    /// Stage count and thread settings.
    pub pipeline: PipelineConfig,
    /// Thread names for stages 1.., in order. Missing names become
    /// `stage-<n>`.
    pub stage_names: Vec<String>,
    /// Frame pacing for [`FrameLoop::run`](crate::FrameLoop::run). 0 runs
    /// frames back to back.
    pub target_fps: u32,
    /// How long a frame waits for its stage workers.
    pub frame_timeout_ms: u64,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            stage_names: Vec::new(),
            target_fps: 60,
            frame_timeout_ms: 1000,
        }
    }
}

impl FrameLoopConfig {
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
        self.pipeline.validate()?;
        if self.frame_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "frame_timeout_ms must be non-zero".to_string(),
            ));
        }
        let worker_stages = self.pipeline.num_stages - 1;
        if self.stage_names.len() > worker_stages {
            return Err(ConfigError::Invalid(format!(
                "stage_names lists {} names but the pipeline has {worker_stages} worker stages",
                self.stage_names.len()
            )));
        }
        Ok(())
    }

    /// Thread name for `stage`.
    #[must_use]
    pub fn stage_name(&self, stage: usize) -> String {
        stage
            .checked_sub(1)
            .and_then(|i| self.stage_names.get(i))
            .cloned()
            .unwrap_or_else(|| format!("stage-{stage}"))
    }

    /// Time budget of one frame, `None` when unpaced.
    #[must_use]
    pub fn frame_budget(&self) -> Option<Duration> {
        (self.target_fps > 0).then(|| Duration::from_secs(1) / self.target_fps)
    }

    /// Stage worker timeout.
    #[inline]
    #[must_use]
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FrameLoopConfig::from_toml_str("").unwrap();
        assert_eq!(config, FrameLoopConfig::default());
        assert_eq!(config.pipeline.num_stages, 1);
        assert_eq!(config.frame_budget(), Some(Duration::from_secs(1) / 60));
    }

    #[test]
    fn test_nested_pipeline_table() {
        let config = FrameLoopConfig::from_toml_str(
            r#"
            stage_names = ["cull", "draw"]
            target_fps = 0
            frame_timeout_ms = 250

            [pipeline]
            num_stages = 3

            [pipeline.threads]
            allow_threads = false
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.num_stages, 3);
        assert!(!config.pipeline.threads.allow_threads);
        assert_eq!(config.frame_budget(), None);
        assert_eq!(config.frame_timeout(), Duration::from_millis(250));
        assert_eq!(config.stage_name(1), "cull");
        assert_eq!(config.stage_name(2), "draw");
    }

    #[test]
    fn test_missing_stage_names_are_generated() {
        let config = FrameLoopConfig {
            stage_names: vec!["cull".into()],
            ..FrameLoopConfig::default()
        };
        assert_eq!(config.stage_name(1), "cull");
        assert_eq!(config.stage_name(3), "stage-3");
        assert_eq!(config.stage_name(0), "stage-0");
    }

    #[test]
    fn test_too_many_stage_names_rejected() {
        let result = FrameLoopConfig::from_toml_str(
            r#"
            stage_names = ["cull", "draw"]

            [pipeline]
            num_stages = 2
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = FrameLoopConfig::from_toml_str("frame_timeout_ms = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = FrameLoopConfig::from_toml_str("fps = 30");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
