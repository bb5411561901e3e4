//! Gaze analysis
//!
//! Turns facial landmarks into an attention state:
//! - Landmark detection behind the [`LandmarkDetector`] boundary
//! - Head pose estimation (PnP against a rigid face model)
//! - Euler decomposition into pitch/yaw/roll
//! - Stateless attention classification, with optional smoothing

pub mod analysis;
pub mod attention;
pub mod config;
pub mod landmarks;
#[cfg(feature = "onnx")]
pub mod mesh;
pub mod pnp;
pub mod pose;
pub mod smoothing;

pub use analysis::FrameAnalysis;
pub use attention::{AttentionClassifier, AttentionState, AttentionThresholds};
pub use config::GazeConfig;
pub use landmarks::{FacialLandmark, LandmarkDetector, LandmarkSet, ReplayDetector};
#[cfg(feature = "onnx")]
pub use mesh::MeshDetector;
pub use pnp::{solve_pnp, PnpSettings, PnpSolution};
pub use pose::{rotation_to_euler, CameraModel, HeadPose, HeadPoseEstimator, ReferenceFaceModel};
pub use smoothing::{ExponentialPoseFilter, SmoothedClassifier};

use std::sync::atomic::{AtomicU64, Ordering};

use camera_capture::VideoFrame;
use thiserror::Error;
use tracing::{debug, warn};

/// Gaze error types
#[derive(Error, Debug)]
pub enum GazeError {
    #[error("Pose estimation failed: {0}")]
    PoseSolveFailed(String),

    #[error("Invalid landmarks: {0}")]
    InvalidLandmarks(String),

    #[error("Landmark detector failed: {0}")]
    Detector(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),
}

/// Landmarks to pose to attention state. `Send + Sync`; the only state is a
/// count of estimator runs.
#[derive(Debug, Default)]
pub struct PoseStage {
    estimator: HeadPoseEstimator,
    classifier: AttentionClassifier,
    estimations: AtomicU64,
}

impl Clone for PoseStage {
    fn clone(&self) -> Self {
        Self {
            estimator: self.estimator.clone(),
            classifier: self.classifier,
            estimations: AtomicU64::new(self.estimations()),
        }
    }
}

impl PoseStage {
    pub fn new(estimator: HeadPoseEstimator, classifier: AttentionClassifier) -> Self {
        Self {
            estimator,
            classifier,
            estimations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(
            HeadPoseEstimator::new(config.pnp),
            AttentionClassifier::new(config.thresholds),
        )
    }

    pub fn classifier(&self) -> &AttentionClassifier {
        &self.classifier
    }

    /// Times the head pose estimator has run, failed solves included
    pub fn estimations(&self) -> u64 {
        self.estimations.load(Ordering::Relaxed)
    }

    /// Analyze one frame's detector output.
    ///
    /// A solver failure is recorded in `pose_error` and leaves the frame
    /// without pose or state.
    pub fn evaluate(
        &self,
        sequence: u64,
        landmarks: Option<LandmarkSet>,
        width: u32,
        height: u32,
    ) -> FrameAnalysis {
        let Some(landmarks) = landmarks else {
            return FrameAnalysis::no_face(sequence);
        };

        self.estimations.fetch_add(1, Ordering::Relaxed);
        match self.estimator.estimate(&landmarks, width, height) {
            Ok(pose) => FrameAnalysis {
                sequence,
                attention: Some(self.classifier.classify(&pose)),
                head_pose: Some(pose),
                landmarks: Some(landmarks),
                pose_error: None,
            },
            Err(e) => {
                warn!("Frame {}: {}", sequence, e);
                FrameAnalysis {
                    sequence,
                    landmarks: Some(landmarks),
                    pose_error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }
}

/// Gaze analysis module: detector plus pose stage plus optional smoothing
pub struct GazeAnalyzer<D> {
    detector: D,
    stage: PoseStage,
    smoother: Option<SmoothedClassifier>,
}

impl<D: LandmarkDetector> GazeAnalyzer<D> {
    /// Create a new analyzer with configuration
    pub fn new(config: &GazeConfig, detector: D) -> Result<Self, GazeError> {
        config.validate()?;
        let stage = PoseStage::from_config(config);
        let smoother = config
            .smoothing_alpha
            .map(|alpha| SmoothedClassifier::new(*stage.classifier(), alpha))
            .transpose()?;

        Ok(Self {
            detector,
            stage,
            smoother,
        })
    }

    /// Analyze a single frame.
    ///
    /// Errors come only from the detector; "no face" and solver failures are
    /// part of the returned analysis.
    pub fn analyze(&mut self, frame: &VideoFrame) -> Result<FrameAnalysis, GazeError> {
        let landmarks = self.detector.detect(frame)?;
        if landmarks.is_none() {
            debug!("Frame {}: no face", frame.sequence);
        }

        let mut analysis = self
            .stage
            .evaluate(frame.sequence, landmarks, frame.width, frame.height);
        if let Some(smoother) = self.smoother.as_mut() {
            smoother.apply(&mut analysis);
        }
        Ok(analysis)
    }

    pub fn stage(&self) -> &PoseStage {
        &self.stage
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Split into parts for the pipelined monitor
    pub fn into_parts(self) -> (D, PoseStage, Option<SmoothedClassifier>) {
        (self.detector, self.stage, self.smoother)
    }

    /// Forget smoothing history (e.g. on a new user)
    pub fn reset_state(&mut self) {
        if let Some(smoother) = self.smoother.as_mut() {
            smoother.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use nalgebra::Vector3;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    fn landmarks_for(pose: HeadPose) -> LandmarkSet {
        let camera = CameraModel::from_frame_size(WIDTH, HEIGHT).unwrap();
        ReferenceFaceModel::canonical()
            .landmarks_at(&pose, &Vector3::new(0.0, 0.0, 1200.0), &camera)
            .unwrap()
    }

    fn analyzer(frames: Vec<(u64, Option<LandmarkSet>)>) -> GazeAnalyzer<ReplayDetector> {
        let detector = ReplayDetector::new(frames.into_iter().collect::<HashMap<_, _>>());
        GazeAnalyzer::new(&GazeConfig::default(), detector).unwrap()
    }

    #[test]
    fn test_turned_head_is_left() {
        let mut analyzer = analyzer(vec![(0, Some(landmarks_for(HeadPose::new(0.0, 30.0, 0.0))))]);
        let analysis = analyzer.analyze(&VideoFrame::blank(WIDTH, HEIGHT, 0)).unwrap();

        assert!(analysis.face_detected());
        assert_eq!(analysis.attention, Some(AttentionState::Left));
        let yaw = analysis.head_pose.unwrap().yaw;
        assert!((yaw - 30.0).abs() < 0.5, "yaw {}", yaw);
        assert!(analysis.is_violation());
    }

    #[test]
    fn test_frontal_is_forward() {
        let mut analyzer = analyzer(vec![(0, Some(landmarks_for(HeadPose::default())))]);
        let analysis = analyzer.analyze(&VideoFrame::blank(WIDTH, HEIGHT, 0)).unwrap();
        assert_eq!(analysis.attention, Some(AttentionState::Forward));
        assert_eq!(analysis.overlay_text().as_deref(), Some("OK: Focused"));
    }

    #[test]
    fn test_no_face_skips_estimation() {
        let mut analyzer = analyzer(vec![(0, None)]);
        let analysis = analyzer.analyze(&VideoFrame::blank(WIDTH, HEIGHT, 0)).unwrap();
        assert!(!analysis.face_detected());
        assert!(analysis.head_pose.is_none());
        assert!(analysis.attention.is_none());
        assert!(analysis.pose_error.is_none());
    }

    #[test]
    fn test_collinear_landmarks_record_pose_error() {
        let line = LandmarkSet::from_pixels([
            [100.0, 100.0],
            [150.0, 150.0],
            [200.0, 200.0],
            [250.0, 250.0],
            [300.0, 300.0],
            [350.0, 350.0],
        ]);
        let analysis = PoseStage::default().evaluate(4, Some(line), WIDTH, HEIGHT);
        assert!(analysis.pose_failed());
        assert!(analysis.attention.is_none());
        assert!(analysis.pose_error.is_some());
    }

    #[test]
    fn test_nearly_collinear_landmarks_record_pose_error() {
        let line = LandmarkSet::from_pixels([
            [100.0, 100.1],
            [140.0, 119.9],
            [180.0, 140.1],
            [220.0, 159.9],
            [260.0, 180.1],
            [300.0, 199.9],
        ]);
        let analysis = PoseStage::default().evaluate(5, Some(line), WIDTH, HEIGHT);
        assert!(analysis.pose_failed());
        assert!(analysis.attention.is_none());
        assert!(!analysis.is_violation());
    }

    #[test]
    fn test_estimations_count_only_frames_with_landmarks() {
        let stage = PoseStage::default();
        stage.evaluate(0, None, WIDTH, HEIGHT);
        assert_eq!(stage.estimations(), 0);

        stage.evaluate(1, Some(landmarks_for(HeadPose::default())), WIDTH, HEIGHT);
        let line = LandmarkSet::from_pixels([[10.0, 10.0]; 6]);
        stage.evaluate(2, Some(line), WIDTH, HEIGHT);
        assert_eq!(stage.estimations(), 2);
        assert_eq!(stage.clone().estimations(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GazeConfig {
            smoothing_alpha: Some(2.0),
            ..Default::default()
        };
        assert!(GazeAnalyzer::new(&config, ReplayDetector::default()).is_err());
    }

    #[test]
    fn test_smoothing_damps_single_frame_spike() {
        let config = GazeConfig {
            smoothing_alpha: Some(0.2),
            ..Default::default()
        };
        let detector = ReplayDetector::new(HashMap::from([
            (0, Some(landmarks_for(HeadPose::default()))),
            (1, Some(landmarks_for(HeadPose::new(0.0, 40.0, 0.0)))),
        ]));
        let mut analyzer = GazeAnalyzer::new(&config, detector).unwrap();

        analyzer.analyze(&VideoFrame::blank(WIDTH, HEIGHT, 0)).unwrap();
        let spike = analyzer.analyze(&VideoFrame::blank(WIDTH, HEIGHT, 1)).unwrap();
        assert_eq!(spike.attention, Some(AttentionState::Forward));
    }

    #[test]
    fn test_stage_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PoseStage>();
    }
}
