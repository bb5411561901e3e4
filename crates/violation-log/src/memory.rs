//! In-memory violation log

use std::collections::VecDeque;
use std::sync::Mutex;

use camera_capture::VideoFrame;
use chrono::Local;
use tracing::debug;

use crate::{LogError, ViolationLogger, ViolationRecord};

/// Keeps violation records without touching disk (dry runs, tests)
#[derive(Debug)]
pub struct InMemoryViolationLog {
    records: Mutex<VecDeque<ViolationRecord>>,
    max_records: usize,
}

impl InMemoryViolationLog {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Keep at most `max_records`, dropping the oldest
    pub fn with_capacity(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
        }
    }

    /// Record a violation
    pub fn record(&self, frame: &VideoFrame, label: &str) -> Result<ViolationRecord, LogError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| LogError::WriteFailed(format!("Lock error: {}", e)))?;

        // Enforce retention
        while records.len() >= self.max_records {
            records.pop_front();
        }

        let record = ViolationRecord {
            label: label.to_string(),
            timestamp: Local::now(),
            path: None,
            sequence: frame.sequence,
        };
        records.push_back(record.clone());
        debug!("Recorded {} violation for frame {}", label, frame.sequence);
        Ok(record)
    }

    /// Records, oldest first
    pub fn records(&self) -> Vec<ViolationRecord> {
        self.records
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl Default for InMemoryViolationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ViolationLogger for InMemoryViolationLog {
    fn log(&mut self, frame: &VideoFrame, label: &str) -> Result<ViolationRecord, LogError> {
        self.record(frame, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_retrieve() {
        let mut log = InMemoryViolationLog::new();
        log.log(&VideoFrame::blank(4, 4, 9), "Left").unwrap();

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "Left");
        assert_eq!(records[0].sequence, 9);
        assert!(records[0].path.is_none());
    }

    #[test]
    fn test_retention_drops_oldest() {
        let log = InMemoryViolationLog::with_capacity(2);
        for seq in 0..3 {
            log.record(&VideoFrame::blank(4, 4, seq), "Up").unwrap();
        }
        let sequences: Vec<u64> = log.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_shared_handle_logs_into_same_store() {
        let log = Arc::new(InMemoryViolationLog::new());
        let mut handle = Arc::clone(&log);
        handle.log(&VideoFrame::blank(4, 4, 1), "Down").unwrap();
        assert_eq!(log.len(), 1);
    }
}
