//! Gaze analysis configuration

use serde::{Deserialize, Serialize};

use crate::attention::AttentionThresholds;
use crate::pnp::PnpSettings;
use crate::GazeError;

/// Gaze analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Classification limits (degrees)
    pub thresholds: AttentionThresholds,

    /// PnP solver settings
    pub pnp: PnpSettings,

    /// Exponential smoothing factor; `None` keeps per-frame classification
    pub smoothing_alpha: Option<f64>,

    /// Landmark replay file (JSON)
    pub landmarks_path: Option<String>,

    /// Face-mesh ONNX model (requires the `onnx` feature)
    pub mesh_model_path: Option<String>,

    /// Face presence score required from the mesh model
    pub mesh_confidence: f32,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            thresholds: AttentionThresholds::default(),
            pnp: PnpSettings::default(),
            smoothing_alpha: None,
            landmarks_path: None,
            mesh_model_path: None,
            mesh_confidence: 0.5,
        }
    }
}

impl GazeConfig {
    /// Create strict config (lower thresholds)
    pub fn strict() -> Self {
        Self {
            thresholds: AttentionThresholds {
                yaw_degrees: 15.0,
                pitch_degrees: 12.0,
            },
            ..Default::default()
        }
    }

    /// Create lenient config (higher thresholds)
    pub fn lenient() -> Self {
        Self {
            thresholds: AttentionThresholds {
                yaw_degrees: 35.0,
                pitch_degrees: 30.0,
            },
            ..Default::default()
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), GazeError> {
        let t = &self.thresholds;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(t.yaw_degrees) || !positive(t.pitch_degrees) {
            return Err(GazeError::Config(format!(
                "thresholds must be positive, got yaw={} pitch={}",
                t.yaw_degrees, t.pitch_degrees
            )));
        }
        if let Some(alpha) = self.smoothing_alpha {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(GazeError::Config(format!(
                    "smoothing_alpha must be in (0, 1], got {}",
                    alpha
                )));
            }
        }
        if self.pnp.max_iterations == 0 {
            return Err(GazeError::Config("pnp.max_iterations must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.pnp.degeneracy_tolerance) {
            return Err(GazeError::Config(format!(
                "pnp.degeneracy_tolerance must be in [0, 1), got {}",
                self.pnp.degeneracy_tolerance
            )));
        }
        if !positive(self.pnp.max_rms_error_px) {
            return Err(GazeError::Config(format!(
                "pnp.max_rms_error_px must be positive, got {}",
                self.pnp.max_rms_error_px
            )));
        }
        if !(0.0..=1.0).contains(&self.mesh_confidence) {
            return Err(GazeError::Config(format!(
                "mesh_confidence must be in [0, 1], got {}",
                self.mesh_confidence
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_reference_thresholds() {
        let config = GazeConfig::default();
        assert_eq!(config.thresholds.yaw_degrees, 25.0);
        assert_eq!(config.thresholds.pitch_degrees, 20.0);
        assert!(config.smoothing_alpha.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_ordered() {
        let strict = GazeConfig::strict();
        let lenient = GazeConfig::lenient();
        assert!(strict.thresholds.yaw_degrees < lenient.thresholds.yaw_degrees);
        assert!(strict.validate().is_ok());
        assert!(lenient.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GazeConfig::default();
        config.thresholds.yaw_degrees = -1.0;
        assert!(config.validate().is_err());

        let config = GazeConfig {
            smoothing_alpha: Some(0.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = GazeConfig::default();
        config.pnp.max_rms_error_px = 0.0;
        assert!(config.validate().is_err());

        let mut config = GazeConfig::default();
        config.pnp.degeneracy_tolerance = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GazeConfig =
            serde_json::from_str(r#"{ "thresholds": { "yaw_degrees": 30.0 } }"#).unwrap();
        assert_eq!(config.thresholds.yaw_degrees, 30.0);
        assert_eq!(config.thresholds.pitch_degrees, 20.0);
        assert_eq!(config.pnp, PnpSettings::default());
    }
}
