//! Gaze Monitor
//!
//! Drives the attention pipeline over a frame source: read a frame, detect
//! landmarks, estimate head pose, classify, log violations and present the
//! result. Runs as a synchronous loop or as a tokio pipeline.

pub mod config;
pub mod display;
pub mod pipeline;
pub mod runner;
#[cfg(test)]
mod testing;

pub use config::{LoggingConfig, MonitorConfig, PipelineConfig};
pub use display::{AnnotatedFrameWriter, DisplaySink, TracingDisplay};
pub use pipeline::{run_pipelined, Resequencer};
pub use runner::{Monitor, MonitorSummary, OutputStage, ReadFailurePolicy};

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camera_capture::CameraError;
use gaze::GazeError;
use thiserror::Error;
use tracing::{subscriber::SetGlobalDefaultError, Level};
use tracing_subscriber::FmtSubscriber;
use violation_log::LogError;

/// Monitor error types
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Gaze error: {0}")]
    Gaze(#[from] GazeError),

    #[error("Violation log error: {0}")]
    Log(#[from] LogError),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Display error: {0}")]
    Display(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Cooperative stop flag, polled once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Initialize logging; unknown levels fall back to `info`
pub fn init_logging(level: &str) -> Result<(), SetGlobalDefaultError> {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
