//! Linear pose from six or more non-coplanar correspondences.
use super::planar::nearest_rotation;
use super::PnpError;
use crate::camera::{CameraIntrinsics, CameraPose};
use nalgebra as na;

pub const MIN_DLT_POINTS: usize = 6;

/// Estimates `[R | t]` from object points and undistorted pixels with a normalized DLT, then
/// projects the rotation block onto SO(3).
pub fn solve_dlt(
    object: &[na::Point3<f64>],
    image: &[na::Point2<f64>],
    intrinsics: &CameraIntrinsics,
) -> Result<CameraPose, PnpError> {
    let n = object.len();
    if n < MIN_DLT_POINTS || image.len() != n {
        return Err(PnpError::InsufficientCorrespondences {
            required: MIN_DLT_POINTS,
            actual: n.min(image.len()),
        });
    }

    let centroid = object.iter().fold(na::Vector3::zeros(), |acc, p| acc + p.coords) / n as f64;
    let mean_dist = object.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n as f64;
    if mean_dist <= f64::EPSILON {
        return Err(PnpError::Degenerate);
    }
    let scale = 3f64.sqrt() / mean_dist;
    #[rustfmt::skip]
    let t_world = na::Matrix4::new(
        scale, 0.0, 0.0, -scale * centroid.x,
        0.0, scale, 0.0, -scale * centroid.y,
        0.0, 0.0, scale, -scale * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );

    let mut a = na::DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, pi)) in object.iter().zip(image).enumerate() {
        let w = (pw.coords - centroid) * scale;
        let m = intrinsics.normalize(pi);
        let (r0, r1) = (2 * i, 2 * i + 1);
        for (c, v) in [w.x, w.y, w.z, 1.0].into_iter().enumerate() {
            a[(r0, c)] = v;
            a[(r0, 8 + c)] = -m.x * v;
            a[(r1, 4 + c)] = v;
            a[(r1, 8 + c)] = -m.y * v;
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(PnpError::Degenerate)?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(PnpError::Degenerate)?;
    let p_norm = na::Matrix3x4::from_fn(|r, c| v_t[(smallest, 4 * r + c)]);
    let p = p_norm * t_world;

    let m = p.fixed_view::<3, 3>(0, 0).into_owned();
    let mut s = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if s <= f64::EPSILON {
        return Err(PnpError::Degenerate);
    }
    if m.determinant() < 0.0 {
        s = -s;
    }
    let rotation = nearest_rotation(&(m / s)).ok_or(PnpError::Degenerate)?;
    let translation = p.column(3).into_owned() / s;
    Ok(CameraPose {
        rotation,
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{project_point, Distortion};
    use approx::assert_relative_eq;

    #[test]
    fn test_dlt_recovers_pose() -> anyhow::Result<()> {
        let k = CameraIntrinsics {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            width: 1280,
            height: 720,
        };
        let truth = CameraPose {
            rotation: na::Rotation3::from_euler_angles(0.1, -0.05, 0.2).into_inner(),
            translation: na::Vector3::new(0.1, -0.05, 1.0),
        };
        let mut object = Vec::new();
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    object.push(na::Point3::new(x as f64 * 0.1, y as f64 * 0.1, 0.5 + z as f64 * 0.1));
                }
            }
        }
        let image = object
            .iter()
            .map(|p| project_point(p, &truth, &k, &Distortion::default()))
            .collect::<Result<Vec<_>, _>>()?;

        let pose = solve_dlt(&object, &image, &k)?;
        assert_relative_eq!(pose.rotation, truth.rotation, epsilon = 1e-6);
        assert_relative_eq!(pose.translation, truth.translation, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_too_few_points() {
        let object = [na::Point3::origin(); 5];
        let image = [na::Point2::origin(); 5];
        let k = CameraIntrinsics {
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
            width: 1,
            height: 1,
        };
        assert!(matches!(
            solve_dlt(&object, &image, &k),
            Err(PnpError::InsufficientCorrespondences { required: 6, actual: 5 })
        ));
    }
}
