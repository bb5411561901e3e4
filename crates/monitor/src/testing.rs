//! Shared test fixtures

use camera_capture::VideoFrame;
use gaze::{CameraModel, FrameAnalysis, HeadPose, LandmarkSet, ReferenceFaceModel};
use nalgebra::Vector3;

use crate::display::DisplaySink;
use crate::MonitorError;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Landmarks of the reference face posed at `pose`, 1200 units in front of
/// a camera for a `WIDTH` x `HEIGHT` frame
pub fn landmarks_for(pose: HeadPose) -> LandmarkSet {
    let camera = CameraModel::from_frame_size(WIDTH, HEIGHT).unwrap();
    ReferenceFaceModel::canonical()
        .landmarks_at(&pose, &Vector3::new(0.0, 0.0, 1200.0), &camera)
        .unwrap()
}

/// Remembers what it was shown
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub sequences: Vec<u64>,
    pub overlays: Vec<Option<String>>,
}

impl DisplaySink for RecordingDisplay {
    fn present(
        &mut self,
        _frame: &VideoFrame,
        analysis: &FrameAnalysis,
    ) -> Result<(), MonitorError> {
        self.sequences.push(analysis.sequence);
        self.overlays.push(analysis.overlay_text());
        Ok(())
    }
}
