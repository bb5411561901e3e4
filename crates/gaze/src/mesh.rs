//! Face-mesh landmark detector backed by ONNX Runtime.
//!
//! Expects a 468-point face-mesh model: input `1x192x192x3` RGB scaled to
//! 0..1, output 0 the mesh as `x, y, z` triples in 192-pixel input space,
//! output 1 the face-presence logit.

use camera_capture::VideoFrame;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, error, info};

use crate::landmarks::{LandmarkDetector, LandmarkSet};
use crate::GazeError;

/// Model input edge length
pub const INPUT_SIZE: u32 = 192;

/// Points in the face mesh
pub const MESH_POINTS: usize = 468;

pub struct MeshDetector {
    session: Session,
    confidence_threshold: f32,
}

impl MeshDetector {
    pub fn new(model_path: &str, confidence_threshold: f32) -> Result<Self, GazeError> {
        info!("Loading face mesh model from {}", model_path);
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                error!("Failed to load face mesh model: {}", e);
                GazeError::ModelLoad(e.to_string())
            })?;

        Ok(Self {
            session,
            confidence_threshold,
        })
    }
}

impl LandmarkDetector for MeshDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, GazeError> {
        let input = preprocess(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![input].map_err(|e| GazeError::Inference(e.to_string()))?)
            .map_err(|e| GazeError::Inference(e.to_string()))?;

        let mesh = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| GazeError::Inference(e.to_string()))?;
        let flag = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| GazeError::Inference(e.to_string()))?;

        let logit = flag
            .iter()
            .next()
            .copied()
            .ok_or_else(|| GazeError::Inference("empty face flag output".into()))?;
        let mesh: Vec<f32> = mesh.iter().copied().collect();

        decode(&mesh, logit, self.confidence_threshold, frame.width, frame.height)
    }
}

/// Resize the frame to the model input and scale to 0..1 (NHWC)
fn preprocess(frame: &VideoFrame) -> Result<Array4<f32>, GazeError> {
    let img = frame
        .to_rgb_image()
        .ok_or_else(|| GazeError::ImageProcessing("Failed to create image buffer".into()))?;
    let resized = image::imageops::resize(
        &img,
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );

    let size = INPUT_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, y as usize, x as usize, c]] = f32::from(pixel[c]) / 255.0;
        }
    }
    Ok(input)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Turn raw model outputs into the six pose landmarks in frame pixels
fn decode(
    mesh: &[f32],
    face_logit: f32,
    confidence_threshold: f32,
    width: u32,
    height: u32,
) -> Result<Option<LandmarkSet>, GazeError> {
    let score = sigmoid(face_logit);
    if score < confidence_threshold {
        debug!("Face score {:.2} below {:.2}", score, confidence_threshold);
        return Ok(None);
    }
    if mesh.len() < MESH_POINTS * 3 {
        return Err(GazeError::Inference(format!(
            "mesh output has {} values, expected {}",
            mesh.len(),
            MESH_POINTS * 3
        )));
    }

    let scale = INPUT_SIZE as f32;
    let normalized: Vec<(f32, f32)> = mesh
        .chunks_exact(3)
        .take(MESH_POINTS)
        .map(|p| (p[0] / scale, p[1] / scale))
        .collect();
    LandmarkSet::from_normalized_mesh(&normalized, width, height).map(Some)
}
