//! Head pose estimation from six facial landmarks
//!
//! A pinhole camera is derived from the frame size (focal length equal to the
//! frame width, principal point at the centre, no distortion). The rotation
//! mapping a fixed 3D face model onto the observed landmarks is recovered
//! with [`solve_pnp`] and decomposed into pitch/yaw/roll.

use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::landmarks::{FacialLandmark, LandmarkSet, LANDMARK_COUNT};
use crate::pnp::{solve_pnp, PnpSettings, PnpSolution};
use crate::GazeError;

/// `sy` below which the Euler decomposition uses the gimbal-lock branch
pub const SINGULAR_THRESHOLD: f64 = 1e-6;

/// Canonical face, in [`FacialLandmark::ALL`] order. Millimetre-like units,
/// nose tip at the origin.
const REFERENCE_POINTS: [[f64; 3]; LANDMARK_COUNT] = [
    [0.0, 0.0, 0.0],
    [0.0, -330.0, -65.0],
    [-225.0, 170.0, -135.0],
    [225.0, 170.0, -135.0],
    [-150.0, -150.0, -125.0],
    [150.0, -150.0, -125.0],
];

/// Rigid 3D face shape the landmarks are matched against
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFaceModel {
    points: [Point3<f64>; LANDMARK_COUNT],
}

impl Default for ReferenceFaceModel {
    fn default() -> Self {
        Self::canonical()
    }
}

impl ReferenceFaceModel {
    pub fn canonical() -> Self {
        Self {
            points: REFERENCE_POINTS.map(|[x, y, z]| Point3::new(x, y, z)),
        }
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn point(&self, landmark: FacialLandmark) -> Point3<f64> {
        self.points[landmark.index()]
    }

    /// Project the model posed at `pose`, `translation` through `camera`.
    ///
    /// Returns `None` if any point lands behind the camera.
    pub fn landmarks_at(
        &self,
        pose: &HeadPose,
        translation: &Vector3<f64>,
        camera: &CameraModel,
    ) -> Option<LandmarkSet> {
        let projected = camera.project_points(&pose.to_rotation(), translation, &self.points)?;
        let mut points = [Point2::origin(); LANDMARK_COUNT];
        points.copy_from_slice(&projected);
        Some(LandmarkSet::new(points))
    }
}

/// Pinhole intrinsics without lens distortion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    /// Focal length in pixels
    pub focal_length: f64,
    /// Principal point in pixels
    pub center: Point2<f64>,
}

impl CameraModel {
    /// Approximate intrinsics for an uncalibrated camera: focal length equal
    /// to the frame width, principal point at the frame centre.
    pub fn from_frame_size(width: u32, height: u32) -> Result<Self, GazeError> {
        if width == 0 || height == 0 {
            return Err(GazeError::PoseSolveFailed(format!(
                "invalid frame size {}x{}",
                width, height
            )));
        }
        let (w, h) = (f64::from(width), f64::from(height));
        Ok(Self {
            focal_length: w,
            center: Point2::new(w / 2.0, h / 2.0),
        })
    }

    /// The 3x3 intrinsic matrix K
    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        let f = self.focal_length;
        #[rustfmt::skip]
        let k = Matrix3::new(
            f, 0.0, self.center.x,
            0.0, f, self.center.y,
            0.0, 0.0, 1.0,
        );
        k
    }

    /// Pixel to normalized image coordinates
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        Point2::new(
            (pixel.x - self.center.x) / self.focal_length,
            (pixel.y - self.center.y) / self.focal_length,
        )
    }

    /// Camera-frame point to pixel, `None` behind the camera
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z <= f64::EPSILON {
            return None;
        }
        Some(Point2::new(
            self.focal_length * point.x / point.z + self.center.x,
            self.focal_length * point.y / point.z + self.center.y,
        ))
    }

    /// Transform model points into the camera frame and project them
    pub fn project_points(
        &self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        points: &[Point3<f64>],
    ) -> Option<Vec<Point2<f64>>> {
        points
            .iter()
            .map(|p| self.project(&(rotation * p + translation)))
            .collect()
    }
}

/// Head orientation relative to the camera, in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    /// Rotation about x (up-down tilt)
    pub pitch: f64,
    /// Rotation about y (left-right turn)
    pub yaw: f64,
    /// Rotation about z (side tilt)
    pub roll: f64,
}

impl HeadPose {
    pub fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Rotation `Rz(roll) · Ry(yaw) · Rx(pitch)`, the composition that
    /// [`rotation_to_euler`] decomposes.
    pub fn to_rotation(&self) -> Rotation3<f64> {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), self.pitch.to_radians());
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), self.yaw.to_radians());
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), self.roll.to_radians());
        rz * ry * rx
    }
}

/// Decompose a rotation matrix into pitch/yaw/roll in degrees.
///
/// Near gimbal lock (`sy < 1e-6`) roll is pinned to zero and pitch absorbs
/// the remaining rotation.
pub fn rotation_to_euler(r: &Matrix3<f64>) -> HeadPose {
    let sy = (r[(0, 0)] * r[(0, 0)] + r[(1, 0)] * r[(1, 0)]).sqrt();

    let (pitch, yaw, roll) = if sy >= SINGULAR_THRESHOLD {
        (
            r[(2, 1)].atan2(r[(2, 2)]),
            (-r[(2, 0)]).atan2(sy),
            r[(1, 0)].atan2(r[(0, 0)]),
        )
    } else {
        (
            (-r[(1, 2)]).atan2(r[(1, 1)]),
            (-r[(2, 0)]).atan2(sy),
            0.0,
        )
    };

    HeadPose {
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
        roll: roll.to_degrees(),
    }
}

/// Pose plus the solver output it came from
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    pub pose: HeadPose,
    pub solution: PnpSolution,
}

/// Maps landmark sets to head poses. Stateless; share it freely.
#[derive(Debug, Clone, Default)]
pub struct HeadPoseEstimator {
    model: ReferenceFaceModel,
    settings: PnpSettings,
}

impl HeadPoseEstimator {
    pub fn new(settings: PnpSettings) -> Self {
        Self {
            model: ReferenceFaceModel::canonical(),
            settings,
        }
    }

    pub fn with_model(model: ReferenceFaceModel, settings: PnpSettings) -> Self {
        Self { model, settings }
    }

    pub fn model(&self) -> &ReferenceFaceModel {
        &self.model
    }

    /// Head pose for `landmarks` observed in a `width` x `height` frame
    pub fn estimate(
        &self,
        landmarks: &LandmarkSet,
        width: u32,
        height: u32,
    ) -> Result<HeadPose, GazeError> {
        self.solve(landmarks, width, height).map(|estimate| estimate.pose)
    }

    /// Like [`estimate`](Self::estimate), keeping the translation and
    /// reprojection error
    pub fn solve(
        &self,
        landmarks: &LandmarkSet,
        width: u32,
        height: u32,
    ) -> Result<PoseEstimate, GazeError> {
        let camera = CameraModel::from_frame_size(width, height)?;
        let solution = solve_pnp(self.model.points(), landmarks.points(), &camera, &self.settings)?;
        let pose = rotation_to_euler(solution.rotation.matrix());

        debug!(
            "Head pose pitch={:.1} yaw={:.1} roll={:.1} (rms {:.2}px)",
            pose.pitch, pose.yaw, pose.roll, solution.rms_error
        );
        Ok(PoseEstimate { pose, solution })
    }
}
