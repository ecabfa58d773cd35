//! Perspective-n-Point pose of the reference object from named fiducial centers.
//!
//! Observed pixels are undistorted first and every solver works on ideal pinhole pixels. The
//! requested method runs first; if it fails, RANSAC over the minimal solvers is tried before
//! giving up. The reported reprojection error is measured against the raw observations through
//! the full lens model.
pub mod dlt;
pub mod homography;
pub mod planar;
pub mod ransac;
pub mod refine;

pub use ransac::RansacParams;
pub use refine::LmParams;

use crate::camera::{self, CameraError, CameraIntrinsics, CameraPose, Distortion};
use crate::fiducial::{NamedFiducialSet, PinName};
use crate::geom::transform::{matrix_to_quat, rotation_to_rvec, EulerZyx, QuatXyzw};
use crate::model::ReferenceObjectModel;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PnpError {
    #[error("PnP requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences { required: usize, actual: usize },

    #[error("No image point for pin {pin}")]
    MissingCorrespondence { pin: PinName },

    #[error("No reference point for pin {pin}")]
    MissingModelPoint { pin: PinName },

    #[error("Object points are not coplanar, thickness ratio {0:.3e}")]
    NotCoplanar(f64),

    #[error("Degenerate point configuration")]
    Degenerate,

    #[error("Pose puts object points behind the camera")]
    BehindCamera,

    #[error("PnP solve failed: {0}")]
    SolveFailed(String),

    #[error(transparent)]
    Camera(#[from] CameraError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PnpMethod {
    /// Plane-to-image homography, then Levenberg-Marquardt. Needs a coplanar object.
    Planar,
    /// Homography or DLT initialization, whichever the object shape allows, then
    /// Levenberg-Marquardt.
    Iterative,
    Ransac,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpConfig {
    pub method: PnpMethod,
    /// Largest thickness ratio (smallest over largest singular value) treated as a plane.
    pub planarity_tolerance: f64,
    pub lm: LmParams,
    pub ransac: RansacParams,
}

impl Default for PnpConfig {
    fn default() -> Self {
        Self {
            method: PnpMethod::Planar,
            planarity_tolerance: 1e-3,
            lm: LmParams::default(),
            ransac: RansacParams::default(),
        }
    }
}

/// Object-to-camera transform, `p_cam = R p_obj + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub rotation: na::Matrix3<f64>,
    pub translation: na::Vector3<f64>,
    /// Mean pixel distance between observed and reprojected reference points.
    pub reprojection_error_px: f64,
    /// Method that produced the pose, after any fallback.
    pub method: PnpMethod,
}

impl Pose {
    pub fn rvec(&self) -> na::Vector3<f64> {
        rotation_to_rvec(&self.rotation)
    }

    pub fn euler(&self) -> EulerZyx {
        EulerZyx::from_rotation(&self.rotation)
    }

    pub fn quaternion(&self) -> QuatXyzw {
        matrix_to_quat(&self.rotation)
    }

    pub fn report(&self) -> PoseReport {
        let (roll_deg, pitch_deg, yaw_deg) = self.euler().to_degrees();
        let rvec = self.rvec();
        PoseReport {
            rvec: [rvec.x, rvec.y, rvec.z],
            tvec: [self.translation.x, self.translation.y, self.translation.z],
            rotation: std::array::from_fn(|r| std::array::from_fn(|c| self.rotation[(r, c)])),
            quaternion_xyzw: self.quaternion(),
            roll_deg,
            pitch_deg,
            yaw_deg,
            reprojection_error_px: self.reprojection_error_px,
        }
    }
}

/// Serialized form of a [`Pose`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseReport {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
    #[serde(rename = "R")]
    pub rotation: [[f64; 3]; 3],
    pub quaternion_xyzw: QuatXyzw,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub reprojection_error_px: f64,
}

/// Mean pixel distance between `image` and the projections of `object` through the full lens
/// model.
pub fn reprojection_error(
    object: &[na::Point3<f64>],
    image: &[na::Point2<f64>],
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
) -> Result<f64, PnpError> {
    if object.is_empty() {
        return Err(PnpError::InsufficientCorrespondences {
            required: 1,
            actual: 0,
        });
    }
    let mut total = 0.0;
    for (p, uv) in object.iter().zip(image) {
        total += (camera::project_point(p, pose, intrinsics, distortion)? - uv).norm();
    }
    Ok(total / object.len() as f64)
}

fn run_method(
    method: PnpMethod,
    object: &[na::Point3<f64>],
    undistorted: &[na::Point2<f64>],
    intrinsics: &CameraIntrinsics,
    config: &PnpConfig,
) -> Result<CameraPose, PnpError> {
    let initial = match method {
        PnpMethod::Planar => {
            planar::solve_planar(object, undistorted, intrinsics, config.planarity_tolerance)?
        }
        PnpMethod::Iterative => {
            match planar::solve_planar(object, undistorted, intrinsics, config.planarity_tolerance) {
                Err(PnpError::NotCoplanar(_)) => dlt::solve_dlt(object, undistorted, intrinsics)?,
                other => other?,
            }
        }
        PnpMethod::Ransac => {
            return Ok(ransac::solve_ransac(
                object,
                undistorted,
                intrinsics,
                config.planarity_tolerance,
                &config.ransac,
                &config.lm,
            )?
            .pose)
        }
    };
    let refined = refine::refine_pose_lm(object, undistorted, intrinsics, &initial, &config.lm)?;
    log::debug!(
        "{method:?}: rmse {:.4}px after {} LM iterations (converged: {})",
        refined.rmse,
        refined.iterations,
        refined.converged
    );
    Ok(refined.pose)
}

/// Solves the object pose from ordered 2D-3D correspondences given in raw (distorted) pixels.
pub fn solve_pnp(
    object: &[na::Point3<f64>],
    image: &[na::Point2<f64>],
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    config: &PnpConfig,
) -> Result<Pose, PnpError> {
    if object.len() != image.len() || object.len() < 4 {
        return Err(PnpError::InsufficientCorrespondences {
            required: 4,
            actual: object.len().min(image.len()),
        });
    }
    let undistorted: Vec<_> = image
        .iter()
        .map(|p| camera::undistort_pixel(p, intrinsics, distortion))
        .collect();

    let mut method = config.method;
    let pose = match run_method(method, object, &undistorted, intrinsics, config) {
        Ok(pose) => pose,
        Err(err) if method != PnpMethod::Ransac => {
            log::warn!("{method:?} PnP failed ({err}), falling back to RANSAC");
            method = PnpMethod::Ransac;
            run_method(method, object, &undistorted, intrinsics, config)
                .map_err(|e| PnpError::SolveFailed(format!("RANSAC fallback: {e}")))?
        }
        Err(err) => return Err(PnpError::SolveFailed(err.to_string())),
    };

    let reprojection_error_px = reprojection_error(object, image, &pose, intrinsics, distortion)?;
    Ok(Pose {
        rotation: pose.rotation,
        translation: pose.translation,
        reprojection_error_px,
        method,
    })
}

/// Collects the correspondences of every pin in [`PinName::ALL`] order. All pins are required.
pub fn correspondences(
    set: &NamedFiducialSet,
    model: &ReferenceObjectModel,
) -> Result<(Vec<na::Point3<f64>>, Vec<na::Point2<f64>>), PnpError> {
    let mut object = Vec::with_capacity(PinName::ALL.len());
    let mut image = Vec::with_capacity(PinName::ALL.len());
    for pin in PinName::ALL {
        let observed = set
            .get(pin)
            .ok_or(PnpError::MissingCorrespondence { pin })?;
        let reference = model.get(pin).ok_or(PnpError::MissingModelPoint { pin })?;
        object.push(*reference);
        image.push(na::Point2::new(observed.cx, observed.cy));
    }
    Ok((object, image))
}

/// Pose of the reference object seen by one camera.
pub fn solve_pose(
    set: &NamedFiducialSet,
    model: &ReferenceObjectModel,
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    config: &PnpConfig,
) -> Result<Pose, PnpError> {
    let (object, image) = correspondences(set, model).inspect_err(|e| {
        log::warn!(
            "{} side: {e}, {} of {} pins present",
            set.side,
            set.len(),
            PinName::ALL.len()
        );
    })?;
    let pose = solve_pnp(&object, &image, intrinsics, distortion, config)?;
    log::info!(
        "{} side: {:?} pose, reprojection error {:.3}px",
        set.side,
        pose.method,
        pose.reprojection_error_px
    );
    Ok(pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::PixelBox;
    use crate::fiducial::Side;
    use crate::fit::EllipseResult;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 1350.0,
            fy: 1350.0,
            cx: 640.0,
            cy: 360.0,
            width: 1280,
            height: 720,
        }
    }

    fn truth() -> CameraPose {
        CameraPose {
            rotation: na::Rotation3::from_euler_angles(0.2, -0.1, 0.3).into_inner(),
            translation: na::Vector3::new(0.01, -0.02, 0.25),
        }
    }

    fn observed_set(
        model: &ReferenceObjectModel,
        pose: &CameraPose,
        d: &Distortion,
    ) -> NamedFiducialSet {
        let mut set = NamedFiducialSet::new(Side::Left);
        for (pin, p) in model.points() {
            let uv = camera::project_point(p, pose, &intrinsics(), d).unwrap();
            set.points.insert(
                *pin,
                EllipseResult {
                    cls: pin.class_id(),
                    confidence: 1.0,
                    bbox: PixelBox::from([0, 0, 1, 1]),
                    cx: uv.x,
                    cy: uv.y,
                    major: 10.0,
                    minor: 8.0,
                    angle_deg: 0.0,
                    residual: 0.0,
                },
            );
        }
        set
    }

    #[test]
    fn test_planar_six_points() -> anyhow::Result<()> {
        let layout = [
            (0.0, 0.0),
            (0.03, 0.0),
            (0.06, 0.01),
            (0.0, 0.04),
            (0.035, 0.045),
            (0.06, 0.05),
        ];
        let object: Vec<_> = layout.iter().map(|&(x, y)| na::Point3::new(x, y, 0.0)).collect();
        let image = object
            .iter()
            .map(|p| camera::project_point(p, &truth(), &intrinsics(), &Distortion::default()))
            .collect::<Result<Vec<_>, _>>()?;

        for method in [PnpMethod::Planar, PnpMethod::Iterative, PnpMethod::Ransac] {
            let config = PnpConfig {
                method,
                ransac: RansacParams {
                    random_seed: Some(1),
                    ..RansacParams::default()
                },
                ..PnpConfig::default()
            };
            let pose = solve_pnp(&object, &image, &intrinsics(), &Distortion::default(), &config)?;
            assert!(pose.reprojection_error_px < 0.5);
            assert_eq!(pose.method, method);
            assert_relative_eq!(pose.rotation, truth().rotation, epsilon = 1e-6);
            assert_relative_eq!(pose.translation, truth().translation, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_fallback_model_with_distortion() -> anyhow::Result<()> {
        let model = ReferenceObjectModel::fallback();
        let distortion = Distortion::from_coeffs([-0.12, 0.05, 0.001, -0.0005, 0.0]);
        let set = observed_set(&model, &truth(), &distortion);

        let pose = solve_pose(&set, &model, &intrinsics(), &distortion, &PnpConfig::default())?;
        assert!(pose.reprojection_error_px < 1e-3, "{}", pose.reprojection_error_px);
        assert_relative_eq!(pose.translation, truth().translation, epsilon = 1e-5);

        let report = pose.report();
        let (roll, pitch, yaw) = EulerZyx::from_rotation(&truth().rotation).to_degrees();
        assert_relative_eq!(report.roll_deg, roll, epsilon = 1e-3);
        assert_relative_eq!(report.pitch_deg, pitch, epsilon = 1e-3);
        assert_relative_eq!(report.yaw_deg, yaw, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_missing_pin_is_reported() {
        let model = ReferenceObjectModel::fallback();
        let mut set = observed_set(&model, &truth(), &Distortion::default());
        set.points.remove(&PinName::CS);
        let config = PnpConfig::default();
        let err = solve_pose(&set, &model, &intrinsics(), &Distortion::default(), &config).unwrap_err();
        assert!(matches!(err, PnpError::MissingCorrespondence { pin: PinName::CS }));
    }

    fn box_object() -> Vec<na::Point3<f64>> {
        (0..8)
            .map(|i| {
                na::Point3::new(
                    (i % 2) as f64 * 0.04,
                    ((i / 2) % 2) as f64 * 0.04,
                    (i / 4) as f64 * 0.03 + 0.002 * i as f64,
                )
            })
            .collect()
    }

    #[test]
    fn test_iterative_non_planar_uses_dlt() -> anyhow::Result<()> {
        let object = box_object();
        let image = object
            .iter()
            .map(|p| camera::project_point(p, &truth(), &intrinsics(), &Distortion::default()))
            .collect::<Result<Vec<_>, _>>()?;
        let config = PnpConfig {
            method: PnpMethod::Iterative,
            ..PnpConfig::default()
        };
        let pose = solve_pnp(&object, &image, &intrinsics(), &Distortion::default(), &config)?;
        assert_eq!(pose.method, PnpMethod::Iterative);
        assert!(pose.reprojection_error_px < 1e-6, "{}", pose.reprojection_error_px);
        assert_relative_eq!(pose.rotation, truth().rotation, epsilon = 1e-6);
        assert_relative_eq!(pose.translation, truth().translation, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_collinear_object_fails_after_fallback() {
        let object: Vec<_> = (0..5).map(|i| na::Point3::new(0.01 * i as f64, 0.0, 0.0)).collect();
        let image: Vec<_> = (0..5).map(|i| na::Point2::new(600.0 + 10.0 * i as f64, 360.0)).collect();
        let err = solve_pnp(&object, &image, &intrinsics(), &Distortion::default(), &PnpConfig::default())
            .unwrap_err();
        match err {
            PnpError::SolveFailed(msg) => assert!(msg.starts_with("RANSAC fallback"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_non_planar_object_falls_back() -> anyhow::Result<()> {
        let object = box_object();
        let image = object
            .iter()
            .map(|p| camera::project_point(p, &truth(), &intrinsics(), &Distortion::default()))
            .collect::<Result<Vec<_>, _>>()?;
        let config = PnpConfig {
            ransac: RansacParams {
                random_seed: Some(3),
                ..RansacParams::default()
            },
            ..PnpConfig::default()
        };
        let pose = solve_pnp(&object, &image, &intrinsics(), &Distortion::default(), &config)?;
        assert_eq!(pose.method, PnpMethod::Ransac);
        assert!(pose.reprojection_error_px < 0.5);
        Ok(())
    }

    #[test]
    fn test_report_field_names() -> anyhow::Result<()> {
        let pose = Pose {
            rotation: na::Matrix3::identity(),
            translation: na::Vector3::new(0.0, 0.0, 1.0),
            reprojection_error_px: 0.25,
            method: PnpMethod::Planar,
        };
        let json = serde_json::to_value(pose.report())?;
        assert_eq!(json["R"][0][0], 1.0);
        assert_eq!(json["tvec"][2], 1.0);
        assert_eq!(json["reprojection_error_px"], 0.25);
        Ok(())
    }
}
