//! Camera Capture Library for the Gaze Monitor
//!
//! Provides the frame sources that feed the attention pipeline.
//! Supports:
//! - Image sequence replay (a directory of stills, sorted by file name)
//! - Scripted in-memory frames for tests and dry runs

pub mod frame;
pub mod source;

pub use frame::VideoFrame;
pub use source::{FrameSource, ImageSequenceSource, ScriptedSource};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    /// The source could not be opened; fatal at startup
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    /// A single frame could not be acquired
    #[error("Frame read failed: {0}")]
    ReadFailed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Directory of frames to replay
    pub frames_dir: PathBuf,
    /// Stop after this many frames
    pub max_frames: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frames_dir: PathBuf::from("frames"),
            max_frames: None,
        }
    }
}

impl CameraConfig {
    /// Open the configured frame source
    pub fn open(&self) -> Result<ImageSequenceSource, CameraError> {
        let source = ImageSequenceSource::open(&self.frames_dir)?;
        Ok(match self.max_frames {
            Some(limit) => source.with_limit(limit),
            None => source,
        })
    }
}
