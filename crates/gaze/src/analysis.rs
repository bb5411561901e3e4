//! Per-frame analysis results

use serde::{Deserialize, Serialize};

use crate::attention::AttentionState;
use crate::landmarks::LandmarkSet;
use crate::pose::HeadPose;

/// Overlay text for a focused user
pub const FOCUSED_TEXT: &str = "OK: Focused";

/// Everything the pipeline learned about one frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    /// Sequence number of the analyzed frame
    pub sequence: u64,

    /// Detected landmarks (if a face was found)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<LandmarkSet>,

    /// Head pose (if the solver succeeded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_pose: Option<HeadPose>,

    /// Attention state (present exactly when `head_pose` is)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<AttentionState>,

    /// Why the solver rejected the landmarks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose_error: Option<String>,
}

impl FrameAnalysis {
    pub fn no_face(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    pub fn face_detected(&self) -> bool {
        self.landmarks.is_some()
    }

    /// Landmarks were found but no pose could be recovered
    pub fn pose_failed(&self) -> bool {
        self.landmarks.is_some() && self.head_pose.is_none()
    }

    pub fn is_violation(&self) -> bool {
        self.attention.map_or(false, AttentionState::is_violation)
    }

    /// Status line drawn over the frame; `None` when there is nothing to say
    pub fn overlay_text(&self) -> Option<String> {
        match self.attention? {
            AttentionState::Forward => Some(FOCUSED_TEXT.to_string()),
            state => Some(format!("WARNING: {}", state)),
        }
    }
}
