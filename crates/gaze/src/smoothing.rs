//! Optional temporal smoothing stage.
//!
//! Wraps the stateless [`AttentionClassifier`]: poses are smoothed first and
//! the smoothed pose is classified. The classifier itself never sees history.

use crate::analysis::FrameAnalysis;
use crate::attention::{AttentionClassifier, AttentionState};
use crate::pose::HeadPose;
use crate::GazeError;

/// Exponential smoothing of pitch, yaw and roll
#[derive(Debug, Clone)]
pub struct ExponentialPoseFilter {
    alpha: f64,
    last: Option<HeadPose>,
}

impl ExponentialPoseFilter {
    /// `alpha` in (0, 1]; 1 disables smoothing
    pub fn new(alpha: f64) -> Result<Self, GazeError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(GazeError::Config(format!(
                "smoothing alpha must be in (0, 1], got {}",
                alpha
            )));
        }
        Ok(Self { alpha, last: None })
    }

    pub fn apply(&mut self, pose: &HeadPose) -> HeadPose {
        let smoothed = match self.last {
            Some(last) => HeadPose {
                pitch: self.alpha * pose.pitch + (1.0 - self.alpha) * last.pitch,
                yaw: self.alpha * pose.yaw + (1.0 - self.alpha) * last.yaw,
                roll: self.alpha * pose.roll + (1.0 - self.alpha) * last.roll,
            },
            None => *pose,
        };
        self.last = Some(smoothed);
        smoothed
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Smoothing filter in front of the stateless classifier
#[derive(Debug, Clone)]
pub struct SmoothedClassifier {
    classifier: AttentionClassifier,
    filter: ExponentialPoseFilter,
}

impl SmoothedClassifier {
    pub fn new(classifier: AttentionClassifier, alpha: f64) -> Result<Self, GazeError> {
        Ok(Self {
            classifier,
            filter: ExponentialPoseFilter::new(alpha)?,
        })
    }

    /// Smooth `pose` against history and classify the result
    pub fn classify(&mut self, pose: &HeadPose) -> (HeadPose, AttentionState) {
        let smoothed = self.filter.apply(pose);
        (smoothed, self.classifier.classify(&smoothed))
    }

    /// Rewrite a frame's pose and state in place. Frames without a pose
    /// clear the history.
    pub fn apply(&mut self, analysis: &mut FrameAnalysis) {
        match analysis.head_pose {
            Some(pose) => {
                let (smoothed, state) = self.classify(&pose);
                analysis.head_pose = Some(smoothed);
                analysis.attention = Some(state);
            }
            None => self.reset(),
        }
    }

    pub fn reset(&mut self) {
        self.filter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_passes_through() {
        let mut filter = ExponentialPoseFilter::new(0.5).unwrap();
        let pose = HeadPose::new(10.0, 20.0, 30.0);
        assert_eq!(filter.apply(&pose), pose);

        let next = filter.apply(&HeadPose::new(20.0, 30.0, 40.0));
        assert_eq!(next, HeadPose::new(15.0, 25.0, 35.0));
    }

    #[test]
    fn test_alpha_bounds() {
        assert!(ExponentialPoseFilter::new(0.0).is_err());
        assert!(ExponentialPoseFilter::new(1.5).is_err());
        assert!(ExponentialPoseFilter::new(f64::NAN).is_err());
        assert!(ExponentialPoseFilter::new(1.0).is_ok());
    }

    #[test]
    fn test_single_spike_is_damped() {
        let mut smoothed = SmoothedClassifier::new(AttentionClassifier::default(), 0.3).unwrap();
        let forward = HeadPose::default();
        smoothed.classify(&forward);

        // One frame at 40° yaw only moves the smoothed yaw to 12°
        let (pose, state) = smoothed.classify(&HeadPose::new(0.0, 40.0, 0.0));
        assert!((pose.yaw - 12.0).abs() < 1e-9);
        assert_eq!(state, AttentionState::Forward);
    }

    #[test]
    fn test_missing_pose_resets_history() {
        let mut smoothed = SmoothedClassifier::new(AttentionClassifier::default(), 0.3).unwrap();
        let mut first = FrameAnalysis::no_face(0);
        first.head_pose = Some(HeadPose::default());
        smoothed.apply(&mut first);

        smoothed.apply(&mut FrameAnalysis::no_face(1));

        let mut turned = FrameAnalysis::no_face(2);
        turned.head_pose = Some(HeadPose::new(0.0, 40.0, 0.0));
        smoothed.apply(&mut turned);
        assert_eq!(turned.attention, Some(AttentionState::Left));
    }
}
