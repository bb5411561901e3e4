//! Facial landmarks consumed by the pose estimator

use std::collections::HashMap;
use std::path::Path;

use camera_capture::VideoFrame;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::GazeError;

/// Number of landmarks the pose estimator consumes
pub const LANDMARK_COUNT: usize = 6;

/// The six landmarks paired with the reference face model.
///
/// Declaration order is the order of [`LandmarkSet`] and of the model points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacialLandmark {
    NoseTip,
    Chin,
    LeftEyeOuter,
    RightEyeOuter,
    LeftMouth,
    RightMouth,
}

impl FacialLandmark {
    pub const ALL: [FacialLandmark; LANDMARK_COUNT] = [
        FacialLandmark::NoseTip,
        FacialLandmark::Chin,
        FacialLandmark::LeftEyeOuter,
        FacialLandmark::RightEyeOuter,
        FacialLandmark::LeftMouth,
        FacialLandmark::RightMouth,
    ];

    /// Slot in a [`LandmarkSet`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Index of this landmark in the 468-point face mesh
    pub fn mesh_index(self) -> usize {
        match self {
            FacialLandmark::NoseTip => 1,
            FacialLandmark::Chin => 152,
            FacialLandmark::LeftEyeOuter => 263,
            FacialLandmark::RightEyeOuter => 33,
            FacialLandmark::LeftMouth => 287,
            FacialLandmark::RightMouth => 57,
        }
    }
}

/// Six 2D landmark positions in frame pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: [Point2<f64>; LANDMARK_COUNT],
}

impl LandmarkSet {
    pub fn new(points: [Point2<f64>; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    /// Build from `[x, y]` pixel pairs in [`FacialLandmark::ALL`] order
    pub fn from_pixels(pixels: [[f64; 2]; LANDMARK_COUNT]) -> Self {
        Self {
            points: pixels.map(|[x, y]| Point2::new(x, y)),
        }
    }

    /// Pick the six landmarks out of a normalized (0..1) face mesh and scale
    /// them to a `width` x `height` frame.
    pub fn from_normalized_mesh(
        mesh: &[(f32, f32)],
        width: u32,
        height: u32,
    ) -> Result<Self, GazeError> {
        let mut points = [Point2::origin(); LANDMARK_COUNT];
        for landmark in FacialLandmark::ALL {
            let &(x, y) = mesh.get(landmark.mesh_index()).ok_or_else(|| {
                GazeError::InvalidLandmarks(format!(
                    "mesh has {} points, {:?} needs index {}",
                    mesh.len(),
                    landmark,
                    landmark.mesh_index()
                ))
            })?;
            points[landmark.index()] = Point2::new(
                f64::from(x) * f64::from(width),
                f64::from(y) * f64::from(height),
            );
        }
        Ok(Self { points })
    }

    pub fn get(&self, landmark: FacialLandmark) -> Point2<f64> {
        self.points[landmark.index()]
    }

    pub fn points(&self) -> &[Point2<f64>; LANDMARK_COUNT] {
        &self.points
    }

    /// True when every coordinate is a finite number
    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

/// Maps a frame to zero or one landmark set.
///
/// `Ok(None)` means no face in the frame, which is not an error.
pub trait LandmarkDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, GazeError>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, GazeError> {
        (**self).detect(frame)
    }
}

/// Replays precomputed landmarks keyed by frame sequence number.
///
/// The JSON file maps sequence numbers to six `[x, y]` pixel pairs, or `null`
/// for frames without a face. Frames missing from the file have no face.
///
/// ```json
/// { "0": [[320, 240], [320, 340], [250, 190], [390, 190], [280, 300], [360, 300]],
///   "1": null }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    frames: HashMap<u64, Option<LandmarkSet>>,
}

impl ReplayDetector {
    pub fn new(frames: HashMap<u64, Option<LandmarkSet>>) -> Self {
        Self { frames }
    }

    pub fn from_json(json: &str) -> Result<Self, GazeError> {
        let raw: HashMap<u64, Option<[[f64; 2]; LANDMARK_COUNT]>> = serde_json::from_str(json)
            .map_err(|e| GazeError::Detector(format!("invalid landmark file: {}", e)))?;

        let frames = raw
            .into_iter()
            .map(|(sequence, pixels)| (sequence, pixels.map(LandmarkSet::from_pixels)))
            .collect();
        Ok(Self { frames })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GazeError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| GazeError::Detector(format!("{}: {}", path.display(), e)))?;
        let detector = Self::from_json(&json)?;
        info!(
            "Loaded landmark replay {} ({} frames)",
            path.display(),
            detector.frames.len()
        );
        Ok(detector)
    }

    /// Number of frames with an entry
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl LandmarkDetector for ReplayDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, GazeError> {
        let landmarks = self.frames.get(&frame.sequence).cloned().flatten();
        if landmarks.is_none() {
            debug!("No landmarks recorded for frame {}", frame.sequence);
        }
        Ok(landmarks)
    }
}
