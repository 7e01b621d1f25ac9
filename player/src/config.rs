use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// General player settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-element diagnostic logging (target `engine::element`, debug level)
    #[serde(default)]
    pub element_logging: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            element_logging: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Shape of the synthetic pipeline and how it is driven
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    #[serde(default = "default_frame_count")]
    pub frame_count: u64,

    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// Buffers a link holds before the producer has to wait
    #[serde(default = "default_link_capacity")]
    pub link_capacity: usize,

    #[serde(default = "default_passthrough_stages")]
    pub passthrough_stages: usize,

    /// How often the orchestrator checks for end of stream and failures
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub loop_playback: bool,

    /// Replays after the first run; 0 loops until interrupted
    #[serde(default)]
    pub loop_count: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_count: default_frame_count(),
            frame_size: default_frame_size(),
            link_capacity: default_link_capacity(),
            passthrough_stages: default_passthrough_stages(),
            poll_interval_ms: default_poll_interval(),
            loop_playback: false,
            loop_count: 0,
        }
    }
}

fn default_frame_count() -> u64 {
    250
}
fn default_frame_size() -> usize {
    4096
}
fn default_link_capacity() -> usize {
    4
}
fn default_passthrough_stages() -> usize {
    1
}
fn default_poll_interval() -> u64 {
    10
}

const MAX_PASSTHROUGH_STAGES: usize = 64;

impl Config {
    /// Load configuration from a specific path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("pipeplay");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;

        let pipeline = &self.pipeline;
        if pipeline.link_capacity == 0 {
            anyhow::bail!("Invalid link capacity: 0 (must be at least 1)");
        }
        if pipeline.poll_interval_ms == 0 {
            anyhow::bail!("Invalid poll interval: 0ms (must be at least 1)");
        }
        if pipeline.passthrough_stages > MAX_PASSTHROUGH_STAGES {
            anyhow::bail!(
                "Too many passthrough stages: {} (max {})",
                pipeline.passthrough_stages,
                MAX_PASSTHROUGH_STAGES
            );
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert!(!config.general.element_logging);
        assert_eq!(config.pipeline.frame_count, 250);
        assert_eq!(config.pipeline.link_capacity, 4);
        assert!(!config.pipeline.loop_playback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            frame_count = 10
            loop_playback = true
            "#,
        )
        .unwrap();

        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.pipeline.frame_count, 10);
        assert!(config.pipeline.loop_playback);
        assert_eq!(config.pipeline.frame_size, 4096);
        assert_eq!(config.pipeline.poll_interval_ms, 10);
    }

    #[test]
    fn test_validate_log_level() {
        let config = Config::default();
        assert!(config.validate_log_level("debug").is_ok());
        assert!(config.validate_log_level("verbose").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_pipeline() {
        let mut config = Config::default();
        config.pipeline.link_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.passthrough_stages = MAX_PASSTHROUGH_STAGES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.pipeline.frame_count, 250);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[general]\nlog_level = \"debug\"\nelement_logging = true\n\n[pipeline]\npassthrough_stages = 3"
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!(config.general.element_logging);
        assert_eq!(config.pipeline.passthrough_stages, 3);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[general]\nlog_level = \"loud\"").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline\nframe_count = ").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }
}
