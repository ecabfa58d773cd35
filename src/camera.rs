use nalgebra as na;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Point is behind camera, z={0}")]
    PointBehindCamera(f64),
}

/// Camera intrinsic parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in x direction (pixels)
    pub fx: f64,
    /// Focal length in y direction (pixels)
    pub fy: f64,
    /// Principal point x coordinate (pixels)
    pub cx: f64,
    /// Principal point y coordinate (pixels)
    pub cy: f64,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl CameraIntrinsics {
    pub fn matrix(&self) -> na::Matrix3<f64> {
        na::Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Pixel to normalized image coordinates.
    pub fn normalize(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        na::Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Normalized image coordinates to pixel.
    pub fn denormalize(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        na::Point2::new(p.x * self.fx + self.cx, p.y * self.fy + self.cy)
    }

}

/// Brown-Conrady lens distortion with the `k1, k2, p1, p2, k3` coefficient layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    const UNDISTORT_ITERATIONS: usize = 20;

    pub fn from_coeffs(c: [f64; 5]) -> Self {
        let [k1, k2, p1, p2, k3] = c;
        Self { k1, k2, p1, p2, k3 }
    }

    pub fn coeffs(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs().iter().all(|c| *c == 0.0)
    }

    /// Applies the distortion model to an ideal normalized point.
    pub fn distort(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        na::Point2::new(
            x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Inverts [`Distortion::distort`] by fixed-point iteration on the normalized point.
    pub fn undistort(&self, p: &na::Point2<f64>) -> na::Point2<f64> {
        if self.is_zero() {
            return *p;
        }
        let mut x = *p;
        for _ in 0..Self::UNDISTORT_ITERATIONS {
            let r2 = x.x * x.x + x.y * x.y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            let dx = 2.0 * self.p1 * x.x * x.y + self.p2 * (r2 + 2.0 * x.x * x.x);
            let dy = self.p1 * (r2 + 2.0 * x.y * x.y) + 2.0 * self.p2 * x.x * x.y;
            x = na::Point2::new((p.x - dx) / radial, (p.y - dy) / radial);
        }
        x
    }
}

/// Rigid transform taking object-frame points into the camera frame, `p_cam = R p + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    pub rotation: na::Matrix3<f64>,
    pub translation: na::Vector3<f64>,
}

impl CameraPose {
    pub fn transform(&self, p: &na::Point3<f64>) -> na::Point3<f64> {
        na::Point3::from(self.rotation * p.coords + self.translation)
    }
}

/// Projects an object-frame point to pixels through the pose, the lens distortion and `K`.
pub fn project_point(
    point: &na::Point3<f64>,
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
) -> Result<na::Point2<f64>, CameraError> {
    let p_cam = pose.transform(point);
    if p_cam.z <= 0.0 {
        return Err(CameraError::PointBehindCamera(p_cam.z));
    }
    let ideal = na::Point2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
    Ok(intrinsics.denormalize(&distortion.distort(&ideal)))
}

/// Maps an observed pixel to where it would land through an ideal pinhole with the same `K`.
pub fn undistort_pixel(
    p: &na::Point2<f64>,
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
) -> na::Point2<f64> {
    intrinsics.denormalize(&distortion.undistort(&intrinsics.normalize(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_simple_projection() -> anyhow::Result<()> {
        let pose = CameraPose {
            rotation: na::Matrix3::identity(),
            translation: na::Vector3::new(0.0, 0.0, 10.0),
        };
        let p = project_point(
            &na::Point3::new(1.0, -2.0, 0.0),
            &pose,
            &intrinsics(),
            &Distortion::default(),
        )?;
        assert_relative_eq!(p.x, 370.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 140.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_point_behind_camera() {
        let r = project_point(
            &na::Point3::new(0.0, 0.0, -1.0),
            &CameraPose {
                rotation: na::Matrix3::identity(),
                translation: na::Vector3::zeros(),
            },
            &intrinsics(),
            &Distortion::default(),
        );
        assert!(matches!(r, Err(CameraError::PointBehindCamera(_))));
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let d = Distortion::from_coeffs([-0.21, 0.05, 0.001, -0.0007, 0.002]);
        let k = intrinsics();
        for (x, y) in [(10.0, 12.0), (600.0, 30.0), (320.0, 240.0), (100.0, 450.0)] {
            let ideal = na::Point2::new(x, y);
            let observed = k.denormalize(&d.distort(&k.normalize(&ideal)));
            let back = undistort_pixel(&observed, &k, &d);
            assert_relative_eq!(back.x, x, epsilon = 1e-3);
            assert_relative_eq!(back.y, y, epsilon = 1e-3);
        }
    }
}
