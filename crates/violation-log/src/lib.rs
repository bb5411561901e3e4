//! Violation Log
//!
//! Saves an evidence snapshot for every frame classified as a violation.
//! Files are named `<label>_<YYYYMMDDHHMMSS>.jpg` (local time).

mod disk;
mod memory;

pub use disk::{file_name, DiskViolationLogger, DEFAULT_LOG_DIR};
pub use memory::InMemoryViolationLog;

use std::path::PathBuf;
use std::sync::Arc;

use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp layout in file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Violation log errors
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to write violation snapshot: {0}")]
    WriteFailed(String),
    #[error("Log directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// How snapshot file names are made unique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilenameResolution {
    /// `<label>_<ts>.jpg`; a second violation of the same state within one
    /// second overwrites the first
    #[default]
    Second,
    /// `<label>_<ts>_<sequence>.jpg`
    SecondWithSequence,
}

/// One logged violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub label: String,
    pub timestamp: DateTime<Local>,
    /// Snapshot location, absent for in-memory logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Sequence number of the offending frame
    pub sequence: u64,
}

/// Sink for violation snapshots
pub trait ViolationLogger {
    fn log(&mut self, frame: &VideoFrame, label: &str) -> Result<ViolationRecord, LogError>;
}

impl<L: ViolationLogger + ?Sized> ViolationLogger for Box<L> {
    fn log(&mut self, frame: &VideoFrame, label: &str) -> Result<ViolationRecord, LogError> {
        (**self).log(frame, label)
    }
}

impl ViolationLogger for Arc<InMemoryViolationLog> {
    fn log(&mut self, frame: &VideoFrame, label: &str) -> Result<ViolationRecord, LogError> {
        self.record(frame, label)
    }
}
