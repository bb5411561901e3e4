//! Monitor configuration
//!
//! Loaded from an optional TOML file (`GAZE_MONITOR_CONFIG`, default
//! `gaze-monitor.toml`) with `GAZE__`-prefixed environment overrides, e.g.
//! `GAZE__GAZE__THRESHOLDS__YAW_DEGREES=30`.

use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File};
use camera_capture::CameraConfig;
use gaze::GazeConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;
use violation_log::{FilenameResolution, DEFAULT_LOG_DIR};

use crate::MonitorError;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GAZE_MONITOR_CONFIG";

/// Config file used when `GAZE_MONITOR_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "gaze-monitor.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "GAZE";

/// Violation snapshot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Snapshot directory, created at startup
    pub dir: PathBuf,
    pub filename_resolution: FilenameResolution,
    /// Keep records in memory instead of writing files
    pub dry_run: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            filename_resolution: FilenameResolution::Second,
            dry_run: false,
        }
    }
}

/// Pipelined mode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pose workers; 0 runs the synchronous loop
    pub workers: usize,
    /// Bounded channel depth between stages
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_depth: 8,
        }
    }
}

impl PipelineConfig {
    pub fn is_enabled(&self) -> bool {
        self.workers > 0
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub camera: CameraConfig,
    pub gaze: GazeConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,

    /// Consecutive read failures tolerated; 0 stops on the first one
    pub max_consecutive_read_failures: u32,

    /// Write annotated frames here (optional)
    pub annotated_output_dir: Option<PathBuf>,

    /// tracing level filter
    pub log_level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            gaze: GazeConfig::default(),
            logging: LoggingConfig::default(),
            pipeline: PipelineConfig::default(),
            max_consecutive_read_failures: 0,
            annotated_output_dir: None,
            log_level: "info".into(),
        }
    }
}

impl MonitorConfig {
    /// Load from `GAZE_MONITOR_CONFIG` (or the default file) plus environment
    pub fn load() -> Result<Self, MonitorError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load_from(Path::new(&path))
    }

    /// Load from `path` (missing file is fine) plus environment
    pub fn load_from(path: &Path) -> Result<Self, MonitorError> {
        Self::build(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn build(path: &Path, env: Environment) -> Result<Self, MonitorError> {
        debug!("Loading configuration from {}", path.display());
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env.separator("__").try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        self.gaze.validate()?;
        if self.pipeline.is_enabled() && self.pipeline.queue_depth == 0 {
            return Err(MonitorError::Config(::config::ConfigError::Message(
                "pipeline.queue_depth must be > 0".into(),
            )));
        }
        Ok(())
    }
}
