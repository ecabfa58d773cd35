//! Pose of a (nearly) planar object from the homography between its plane and the image.
use super::homography::dlt_homography;
use super::PnpError;
use crate::camera::{CameraIntrinsics, CameraPose};
use nalgebra as na;

/// Least-squares plane through a point set.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFrame {
    pub origin: na::Vector3<f64>,
    /// Columns are the two in-plane axes and the normal.
    pub axes: na::Matrix3<f64>,
    /// Smallest over largest singular value of the centered points.
    pub thickness: f64,
}

impl PlaneFrame {
    /// In-plane coordinates of `p`.
    pub fn project(&self, p: &na::Point3<f64>) -> na::Point2<f64> {
        let q = self.axes.transpose() * (p.coords - self.origin);
        na::Point2::new(q.x, q.y)
    }
}

/// Fits a plane by SVD. Returns `None` for fewer than three points or (nearly) collinear ones.
pub fn fit_plane(points: &[na::Point3<f64>]) -> Option<PlaneFrame> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let origin = points.iter().fold(na::Vector3::zeros(), |acc, p| acc + p.coords) / n as f64;
    let centered = na::DMatrix::from_fn(n, 3, |r, c| points[r].coords[c] - origin[c]);
    let svd = centered.svd(false, true);
    let v_t = svd.v_t?;

    let mut order = [0usize, 1, 2];
    order.sort_by(|a, b| svd.singular_values[*b].total_cmp(&svd.singular_values[*a]));
    let (s_max, s_mid, s_min) = (
        svd.singular_values[order[0]],
        svd.singular_values[order[1]],
        svd.singular_values[order[2]],
    );
    if s_max <= f64::EPSILON || s_mid / s_max < 1e-6 {
        return None;
    }

    let axis = |i: usize| na::Vector3::new(v_t[(i, 0)], v_t[(i, 1)], v_t[(i, 2)]);
    let (e1, e2) = (axis(order[0]), axis(order[1]));
    let normal = e1.cross(&e2);
    Some(PlaneFrame {
        origin,
        axes: na::Matrix3::from_columns(&[e1, e2, normal]),
        thickness: s_min / s_max,
    })
}

/// Closest rotation to `m` in the Frobenius sense.
pub(crate) fn nearest_rotation(m: &na::Matrix3<f64>) -> Option<na::Matrix3<f64>> {
    let svd = m.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        return Some(u * v_t);
    }
    Some(r)
}

/// Decomposes a plane-to-image homography `H ~ K [r1 r2 t]` into a pose with the plane in
/// front of the camera.
pub fn pose_from_homography(k: &na::Matrix3<f64>, h: &na::Matrix3<f64>) -> Option<CameraPose> {
    let k_inv = k.try_inverse()?;
    let k_inv_h1 = k_inv * h.column(0);
    let k_inv_h2 = k_inv * h.column(1);
    let k_inv_h3 = k_inv * h.column(2);

    let norm = (k_inv_h1.norm() + k_inv_h2.norm()) * 0.5;
    if norm <= f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if k_inv_h3.z < 0.0 {
        lambda = -lambda;
    }

    let r1 = k_inv_h1 * lambda;
    let r2 = k_inv_h2 * lambda;
    let rotation = nearest_rotation(&na::Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]))?;
    Some(CameraPose {
        rotation,
        translation: k_inv_h3 * lambda,
    })
}

/// Solves the pose of object points lying within `tolerance` of a plane from undistorted
/// pixels.
pub fn solve_planar(
    object: &[na::Point3<f64>],
    image: &[na::Point2<f64>],
    intrinsics: &CameraIntrinsics,
    tolerance: f64,
) -> Result<CameraPose, PnpError> {
    if object.len() < 4 || image.len() != object.len() {
        return Err(PnpError::InsufficientCorrespondences {
            required: 4,
            actual: object.len().min(image.len()),
        });
    }
    let frame = fit_plane(object).ok_or(PnpError::Degenerate)?;
    if frame.thickness > tolerance {
        return Err(PnpError::NotCoplanar(frame.thickness));
    }

    let plane: Vec<_> = object.iter().map(|p| frame.project(p)).collect();
    let h = dlt_homography(&plane, image).ok_or(PnpError::Degenerate)?;
    let plane_pose = pose_from_homography(&intrinsics.matrix(), &h).ok_or(PnpError::Degenerate)?;

    // p_cam = R_pc * A^T (p - o) + t
    let rotation = plane_pose.rotation * frame.axes.transpose();
    Ok(CameraPose {
        rotation,
        translation: plane_pose.translation - rotation * frame.origin,
    })
}
