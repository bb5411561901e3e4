//! Perspective-n-Point solver
//!
//! The initial pose comes from a normalized direct linear transform (DLT) on
//! the 2D/3D correspondences. Levenberg-Marquardt then refines rotation and
//! translation against the reprojection error. All work happens in
//! normalized image coordinates, so the focal length only scales the
//! reported error.

use nalgebra::{
    Matrix2, Matrix2x3, Matrix2x6, Matrix3, Matrix3x4, Matrix3x6, Matrix4, Matrix6, Point2,
    Point3, Rotation3, SMatrix, SVector, SymmetricEigen, Vector2, Vector3, Vector4, Vector6,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pose::CameraModel;
use crate::GazeError;

/// Minimum correspondences for the linear initialization
pub const MIN_CORRESPONDENCES: usize = 6;

/// Damping above which no improving step is expected
const MAX_DAMPING: f64 = 1e12;

/// Spread (normalized units) below which image points coincide
const MIN_SPREAD: f64 = 1e-9;

/// Solver settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpSettings {
    /// Levenberg-Marquardt iteration cap
    pub max_iterations: usize,
    /// Step norm below which refinement stops
    pub convergence_epsilon: f64,
    /// Minor/major standard deviation ratio below which image points count
    /// as collinear
    pub degeneracy_tolerance: f64,
    /// Largest RMS reprojection error, in pixels, accepted as a pose
    pub max_rms_error_px: f64,
}

impl Default for PnpSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_epsilon: 1e-10,
            degeneracy_tolerance: 1e-2,
            max_rms_error_px: 15.0,
        }
    }
}

/// Camera-relative pose of the model
#[derive(Debug, Clone, PartialEq)]
pub struct PnpSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    /// Root-mean-square reprojection error in pixels
    pub rms_error: f64,
    /// Refinement iterations used
    pub iterations: usize,
}

/// Find the rotation and translation that project `object_points` onto
/// `image_points` through `camera` with the least squared reprojection error.
pub fn solve_pnp(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    camera: &CameraModel,
    settings: &PnpSettings,
) -> Result<PnpSolution, GazeError> {
    if object_points.len() != image_points.len() {
        return Err(GazeError::PoseSolveFailed(format!(
            "{} model points but {} image points",
            object_points.len(),
            image_points.len()
        )));
    }
    if object_points.len() < MIN_CORRESPONDENCES {
        return Err(GazeError::PoseSolveFailed(format!(
            "need at least {} correspondences, got {}",
            MIN_CORRESPONDENCES,
            object_points.len()
        )));
    }
    let finite = object_points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()))
        && image_points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()));
    if !finite {
        return Err(GazeError::PoseSolveFailed("non-finite coordinates".into()));
    }

    let normalized: Vec<Point2<f64>> = image_points.iter().map(|p| camera.normalize(p)).collect();
    check_spread(&normalized, settings.degeneracy_tolerance)?;

    let (rotation, translation) = linear_pose(object_points, &normalized)?;
    let mut solution = refine(object_points, &normalized, rotation, translation, settings)?;
    solution.rms_error *= camera.focal_length;
    if solution.rms_error > settings.max_rms_error_px {
        return Err(GazeError::PoseSolveFailed(format!(
            "reprojection error {:.1}px exceeds {:.1}px",
            solution.rms_error, settings.max_rms_error_px
        )));
    }

    debug!(
        "PnP converged in {} iterations, rms {:.4}px",
        solution.iterations, solution.rms_error
    );
    Ok(solution)
}

/// Reject coincident or collinear image points, which leave the pose
/// unobservable.
fn check_spread(points: &[Point2<f64>], tolerance: f64) -> Result<(), GazeError> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector2::<f64>::zeros(), |acc, p| acc + p.coords) / n;
    let covariance = points.iter().fold(Matrix2::<f64>::zeros(), |acc, p| {
        let d = p.coords - centroid;
        acc + d * d.transpose()
    }) / n;

    // Closed-form eigenvalues of the symmetric 2x2 covariance
    let half_trace = covariance.trace() / 2.0;
    let disc = (half_trace * half_trace - covariance.determinant()).max(0.0).sqrt();
    let major = half_trace + disc;
    let minor = (half_trace - disc).max(0.0);

    if major.sqrt() <= MIN_SPREAD {
        return Err(GazeError::PoseSolveFailed("image points coincide".into()));
    }
    if (minor / major).sqrt() < tolerance {
        return Err(GazeError::PoseSolveFailed("image points are collinear".into()));
    }
    Ok(())
}

/// Centroid and mean distance to it
fn centroid_and_spread<const D: usize>(points: &[SVector<f64, D>]) -> (SVector<f64, D>, f64) {
    let n = points.len() as f64;
    let centroid = points.iter().fold(SVector::<f64, D>::zeros(), |acc, p| acc + p) / n;
    let spread = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;
    (centroid, spread)
}

/// Normalized DLT estimate of the pose
fn linear_pose(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Result<(Rotation3<f64>, Vector3<f64>), GazeError> {
    let object_coords: Vec<Vector3<f64>> = object.iter().map(|p| p.coords).collect();
    let image_coords: Vec<Vector2<f64>> = image.iter().map(|p| p.coords).collect();
    let (c3, d3) = centroid_and_spread(&object_coords);
    let (c2, d2) = centroid_and_spread(&image_coords);
    if d3 <= f64::EPSILON || d2 <= f64::EPSILON {
        return Err(GazeError::PoseSolveFailed("degenerate point spread".into()));
    }
    let s3 = 3f64.sqrt() / d3;
    let s2 = 2f64.sqrt() / d2;

    // Accumulate AᵀA directly; its smallest eigenvector is the projection
    let mut ata = SMatrix::<f64, 12, 12>::zeros();
    for (x, u) in object_coords.iter().zip(&image_coords) {
        let d = (x - c3) * s3;
        let xh = Vector4::new(d.x, d.y, d.z, 1.0);
        let uh = (u - c2) * s2;

        let mut row_u = SVector::<f64, 12>::zeros();
        row_u.fixed_rows_mut::<4>(0).copy_from(&xh);
        row_u.fixed_rows_mut::<4>(8).copy_from(&(xh * -uh.x));

        let mut row_v = SVector::<f64, 12>::zeros();
        row_v.fixed_rows_mut::<4>(4).copy_from(&xh);
        row_v.fixed_rows_mut::<4>(8).copy_from(&(xh * -uh.y));

        ata += row_u * row_u.transpose() + row_v * row_v.transpose();
    }

    let eigen = SymmetricEigen::new(ata);
    let (min_index, _) = eigen.eigenvalues.argmin();
    let p = eigen.eigenvectors.column(min_index);
    let conditioned = Matrix3x4::from_fn(|r, c| p[r * 4 + c]);

    // Undo the conditioning: P = T2⁻¹ · P̃ · T3
    #[rustfmt::skip]
    let t3 = Matrix4::new(
        s3, 0.0, 0.0, -s3 * c3.x,
        0.0, s3, 0.0, -s3 * c3.y,
        0.0, 0.0, s3, -s3 * c3.z,
        0.0, 0.0, 0.0, 1.0,
    );
    #[rustfmt::skip]
    let t2_inv = Matrix3::new(
        1.0 / s2, 0.0, c2.x,
        0.0, 1.0 / s2, c2.y,
        0.0, 0.0, 1.0,
    );
    let mut projection = t2_inv * conditioned * t3;

    // The null vector's sign is arbitrary; keep the model in front of the camera
    let depth = projection
        .row(2)
        .transpose()
        .dot(&Vector4::new(c3.x, c3.y, c3.z, 1.0));
    if depth < 0.0 {
        projection = -projection;
    }

    let m: Matrix3<f64> = projection.fixed_view::<3, 3>(0, 0).into_owned();
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(GazeError::PoseSolveFailed("SVD of projection failed".into()));
    };
    let scale = svd.singular_values.sum() / 3.0;
    if !scale.is_finite() || scale <= f64::EPSILON {
        return Err(GazeError::PoseSolveFailed("singular projection matrix".into()));
    }

    // Nearest rotation; flip the weakest axis if that leaves a reflection
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let (weakest, _) = svd.singular_values.argmin();
        let mut flip = Matrix3::identity();
        flip[(weakest, weakest)] = -1.0;
        rotation = u * flip * v_t;
    }

    let translation = projection.column(3).into_owned() / scale;
    Ok((Rotation3::from_matrix_unchecked(rotation), translation))
}

/// Sum of squared residuals, `None` if a point falls behind the camera
fn reprojection_cost(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
) -> Option<f64> {
    let mut cost = 0.0;
    for (x, u) in object.iter().zip(image) {
        let pc = rotation * x.coords + translation;
        if pc.z <= f64::EPSILON {
            return None;
        }
        let du = pc.x / pc.z - u.x;
        let dv = pc.y / pc.z - u.y;
        cost += du * du + dv * dv;
    }
    cost.is_finite().then_some(cost)
}

/// Gauss-Newton normal equations JᵀJ and Jᵀr for a left-multiplied rotation
/// increment followed by a translation increment.
fn normal_equations(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
) -> (Matrix6<f64>, Vector6<f64>) {
    let mut hessian = Matrix6::zeros();
    let mut gradient = Vector6::zeros();

    for (x, u) in object.iter().zip(image) {
        let rotated = rotation * x.coords;
        let pc = rotated + translation;
        let inv_z = 1.0 / pc.z;
        let residual = Vector2::new(pc.x * inv_z - u.x, pc.y * inv_z - u.y);

        #[rustfmt::skip]
        let d_proj = Matrix2x3::new(
            inv_z, 0.0, -pc.x * inv_z * inv_z,
            0.0, inv_z, -pc.y * inv_z * inv_z,
        );
        let mut d_point = Matrix3x6::zeros();
        d_point
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(-rotated.cross_matrix()));
        d_point
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&Matrix3::identity());

        let jacobian: Matrix2x6<f64> = d_proj * d_point;
        hessian += jacobian.transpose() * jacobian;
        gradient += jacobian.transpose() * residual;
    }
    (hessian, gradient)
}

fn refine(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    mut rotation: Rotation3<f64>,
    mut translation: Vector3<f64>,
    settings: &PnpSettings,
) -> Result<PnpSolution, GazeError> {
    let mut cost = reprojection_cost(object, image, &rotation, &translation).ok_or_else(|| {
        GazeError::PoseSolveFailed("initial pose places the face behind the camera".into())
    })?;
    let mut lambda = 1e-3;
    let mut iterations = 0;

    'outer: while iterations < settings.max_iterations {
        iterations += 1;
        let (hessian, gradient) = normal_equations(object, image, &rotation, &translation);
        if gradient.norm() <= settings.convergence_epsilon {
            break;
        }

        loop {
            let mut damped = hessian;
            for i in 0..6 {
                damped[(i, i)] += lambda * hessian[(i, i)].max(1e-12);
            }
            let Some(step) = damped.cholesky().map(|c| c.solve(&-gradient)) else {
                lambda *= 10.0;
                if lambda > MAX_DAMPING {
                    break 'outer;
                }
                continue;
            };

            let candidate_rotation =
                Rotation3::new(step.fixed_rows::<3>(0).into_owned()) * rotation;
            let candidate_translation = translation + step.fixed_rows::<3>(3);

            match reprojection_cost(object, image, &candidate_rotation, &candidate_translation) {
                Some(candidate) if candidate < cost => {
                    rotation = candidate_rotation;
                    translation = candidate_translation;
                    cost = candidate;
                    lambda = (lambda / 10.0).max(1e-12);
                    if step.norm() <= settings.convergence_epsilon {
                        break 'outer;
                    }
                    break;
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > MAX_DAMPING {
                        // No step improves the error: local minimum
                        break 'outer;
                    }
                }
            }
        }
    }

    let rms_error = (cost / object.len() as f64).sqrt();
    let finite = rotation.matrix().iter().all(|v| v.is_finite())
        && translation.iter().all(|v| v.is_finite())
        && rms_error.is_finite();
    if !finite {
        return Err(GazeError::PoseSolveFailed("solution is not finite".into()));
    }

    Ok(PnpSolution {
        rotation,
        translation,
        rms_error,
        iterations,
    })
}
