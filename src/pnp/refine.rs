//! Levenberg-Marquardt refinement of a pose against pixel reprojection error.
use super::PnpError;
use crate::camera::{CameraIntrinsics, CameraPose};
use nalgebra as na;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmParams {
    pub max_iters: usize,
    /// Relative decrease of the squared error below which the solve counts as converged.
    pub eps: f64,
    pub lambda_init: f64,
    pub lambda_mul: f64,
}

impl Default for LmParams {
    fn default() -> Self {
        Self {
            max_iters: 20,
            eps: 1e-10,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refined {
    pub pose: CameraPose,
    pub rmse: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Sum of squared pixel residuals, `None` once any point falls behind the camera.
fn squared_error(
    object: &[na::Point3<f64>],
    image: &[na::Point2<f64>],
    k: &CameraIntrinsics,
    pose: &CameraPose,
) -> Option<f64> {
    object.iter().zip(image).try_fold(0.0, |acc, (p, uv)| {
        let pc = pose.transform(p);
        if pc.z <= f64::EPSILON {
            return None;
        }
        let du = k.fx * pc.x / pc.z + k.cx - uv.x;
        let dv = k.fy * pc.y / pc.z + k.cy - uv.y;
        Some(acc + du * du + dv * dv)
    })
}

/// Refines `initial` so that `K (R p + t)` matches the undistorted pixels `image`.
///
/// Rotation updates are applied on the left, `R <- exp(dw) R`, with an analytic Jacobian.
pub fn refine_pose_lm(
    object: &[na::Point3<f64>],
    image: &[na::Point2<f64>],
    k: &CameraIntrinsics,
    initial: &CameraPose,
    params: &LmParams,
) -> Result<Refined, PnpError> {
    let n = object.len();
    if n < 3 || image.len() != n {
        return Err(PnpError::InsufficientCorrespondences {
            required: 3,
            actual: n.min(image.len()),
        });
    }

    let mut pose = initial.clone();
    let mut err = squared_error(object, image, k, &pose).ok_or(PnpError::BehindCamera)?;
    let mut lambda = params.lambda_init;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iters {
        iterations += 1;

        let mut a = na::Matrix6::<f64>::zeros();
        let mut b = na::Vector6::<f64>::zeros();
        for (p, uv) in object.iter().zip(image) {
            let rp = pose.rotation * p.coords;
            let pc = rp + pose.translation;
            let inv_z = 1.0 / pc.z;
            let r = na::Vector2::new(
                k.fx * pc.x * inv_z + k.cx - uv.x,
                k.fy * pc.y * inv_z + k.cy - uv.y,
            );
            #[rustfmt::skip]
            let d_proj = na::Matrix2x3::new(
                k.fx * inv_z, 0.0, -k.fx * pc.x * inv_z * inv_z,
                0.0, k.fy * inv_z, -k.fy * pc.y * inv_z * inv_z,
            );
            let d_rot = d_proj * -rp.cross_matrix();
            let mut j = na::Matrix2x6::<f64>::zeros();
            j.fixed_view_mut::<2, 3>(0, 0).copy_from(&d_rot);
            j.fixed_view_mut::<2, 3>(0, 3).copy_from(&d_proj);
            a += j.transpose() * j;
            b += j.transpose() * r;
        }

        let mut accepted = false;
        while lambda < 1e12 {
            let damped = a + na::Matrix6::identity() * lambda;
            let Some(delta) = damped.cholesky().map(|c| c.solve(&-b)) else {
                lambda *= params.lambda_mul;
                continue;
            };
            let candidate = CameraPose {
                rotation: na::Rotation3::new(delta.fixed_rows::<3>(0).into_owned()).into_inner()
                    * pose.rotation,
                translation: pose.translation + delta.fixed_rows::<3>(3),
            };
            match squared_error(object, image, k, &candidate) {
                Some(e) if e < err => {
                    let decrease = err - e;
                    pose = candidate;
                    err = e;
                    lambda /= params.lambda_mul;
                    accepted = true;
                    converged = decrease <= params.eps * err.max(f64::EPSILON);
                    break;
                }
                _ => lambda *= params.lambda_mul,
            }
        }
        if !accepted {
            // No step lowers the error any more.
            converged = true;
            break;
        }
        if converged {
            break;
        }
    }

    Ok(Refined {
        pose,
        rmse: (err / n as f64).sqrt(),
        iterations,
        converged,
    })
}
