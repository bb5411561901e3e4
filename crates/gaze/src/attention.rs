//! Attention classification from head pose

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pose::HeadPose;

/// Where the user is looking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttentionState {
    #[default]
    Forward,
    Left,
    Right,
    Up,
    Down,
}

impl AttentionState {
    pub const ALL: [AttentionState; 5] = [
        AttentionState::Forward,
        AttentionState::Left,
        AttentionState::Right,
        AttentionState::Up,
        AttentionState::Down,
    ];

    /// Short label, used in violation file names
    pub fn label(self) -> &'static str {
        match self {
            AttentionState::Forward => "Forward",
            AttentionState::Left => "Left",
            AttentionState::Right => "Right",
            AttentionState::Up => "Up",
            AttentionState::Down => "Down",
        }
    }

    /// Every state other than Forward is logged
    pub fn is_violation(self) -> bool {
        self != AttentionState::Forward
    }
}

impl fmt::Display for AttentionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Looking {}", self.label())
    }
}

/// Angular limits beyond which the head counts as turned away (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionThresholds {
    /// Yaw magnitude for Left/Right
    pub yaw_degrees: f64,
    /// Pitch magnitude for Up/Down
    pub pitch_degrees: f64,
}

impl Default for AttentionThresholds {
    fn default() -> Self {
        Self {
            yaw_degrees: 25.0,
            pitch_degrees: 20.0,
        }
    }
}

/// Stateless pose-to-state classifier.
///
/// Rules are checked in order and the first match wins: yaw before pitch,
/// positive before negative. Roll is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttentionClassifier {
    thresholds: AttentionThresholds,
}

impl AttentionClassifier {
    pub fn new(thresholds: AttentionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AttentionThresholds {
        &self.thresholds
    }

    pub fn classify(&self, pose: &HeadPose) -> AttentionState {
        let t = &self.thresholds;
        if pose.yaw > t.yaw_degrees {
            AttentionState::Left
        } else if pose.yaw < -t.yaw_degrees {
            AttentionState::Right
        } else if pose.pitch > t.pitch_degrees {
            AttentionState::Down
        } else if pose.pitch < -t.pitch_degrees {
            AttentionState::Up
        } else {
            AttentionState::Forward
        }
    }
}
