//! JPEG snapshots on disk

use std::fs;
use std::path::{Path, PathBuf};

use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use image::ImageFormat;
use tracing::{debug, info};

use crate::{FilenameResolution, LogError, ViolationLogger, ViolationRecord, TIMESTAMP_FORMAT};

/// Directory used when none is configured
pub const DEFAULT_LOG_DIR: &str = "gaze_logs";

/// Snapshot file name for a violation
pub fn file_name(
    label: &str,
    timestamp: &DateTime<Local>,
    sequence: u64,
    resolution: FilenameResolution,
) -> String {
    let ts = timestamp.format(TIMESTAMP_FORMAT);
    match resolution {
        FilenameResolution::Second => format!("{}_{}.jpg", label, ts),
        FilenameResolution::SecondWithSequence => format!("{}_{}_{}.jpg", label, ts, sequence),
    }
}

/// Writes one JPEG per violation into a directory
#[derive(Debug, Clone)]
pub struct DiskViolationLogger {
    dir: PathBuf,
    resolution: FilenameResolution,
}

impl DiskViolationLogger {
    /// Open the log directory, creating it if needed
    pub fn new(dir: impl AsRef<Path>, resolution: FilenameResolution) -> Result<Self, LogError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("Logging violations to {}", dir.display());
        Ok(Self { dir, resolution })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log with an explicit timestamp
    pub fn log_at(
        &self,
        frame: &VideoFrame,
        label: &str,
        timestamp: DateTime<Local>,
    ) -> Result<ViolationRecord, LogError> {
        let path = self
            .dir
            .join(file_name(label, &timestamp, frame.sequence, self.resolution));

        let image = frame.to_rgb_image().ok_or_else(|| {
            LogError::WriteFailed(format!(
                "frame {} buffer does not match {}x{}",
                frame.sequence, frame.width, frame.height
            ))
        })?;
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| LogError::WriteFailed(format!("{}: {}", path.display(), e)))?;

        debug!("Saved violation snapshot {}", path.display());
        Ok(ViolationRecord {
            label: label.to_string(),
            timestamp,
            path: Some(path),
            sequence: frame.sequence,
        })
    }
}

impl ViolationLogger for DiskViolationLogger {
    fn log(&mut self, frame: &VideoFrame, label: &str) -> Result<ViolationRecord, LogError> {
        self.log_at(frame, label, Local::now())
    }
}
