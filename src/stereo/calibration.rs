//! Stereo calibration bundle: intrinsics, distortion, relative pose and the disparity-to-depth
//! matrix `Q`.
use crate::camera::{CameraIntrinsics, Distortion};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Failed to access calibration file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed calibration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid calibration description: {0}")]
    InvalidDescription(&'static str),

    #[error("Only horizontal stereo rigs are supported, translation is {0:?}")]
    NotHorizontal([f64; 3]),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Rig description produced by the simulator: shared intrinsics and a baseline in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDescription {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees. Informational only.
    #[serde(default)]
    pub fov: f64,
    pub baseline: f64,
    pub intrinsics: Intrinsics,
}

impl CalibrationDescription {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let text = read(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Read-only calibration of a stereo pair. `R`, `T` map left-camera coordinates to the right
/// camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationBundle {
    pub k1: na::Matrix3<f64>,
    pub d1: Distortion,
    pub k2: na::Matrix3<f64>,
    pub d2: Distortion,
    pub r: na::Matrix3<f64>,
    pub t: na::Vector3<f64>,
    pub q: na::Matrix4<f64>,
    pub image_size: Option<(u32, u32)>,
}

/// `Q` of an ideal horizontal rig, so that `Z = fx * baseline / disparity` is positive.
pub fn reprojection_matrix(fx: f64, cx: f64, cy: f64, baseline: f64) -> na::Matrix4<f64> {
    na::Matrix4::new(
        1.0, 0.0, 0.0, -cx,
        0.0, 1.0, 0.0, -cy,
        0.0, 0.0, 0.0, fx,
        0.0, 0.0, 1.0 / baseline, 0.0,
    )
}

impl CalibrationBundle {
    /// Builds the bundle of an ideal rectified rig: identical undistorted cameras, identity
    /// rotation and a purely horizontal baseline.
    pub fn from_description(desc: &CalibrationDescription) -> Result<Self, CalibrationError> {
        let Intrinsics { fx, fy, cx, cy } = desc.intrinsics;
        if !(fx > 0.0 && fy > 0.0) {
            return Err(CalibrationError::InvalidDescription("focal lengths must be positive"));
        }
        if !(desc.baseline > 0.0) {
            return Err(CalibrationError::InvalidDescription("baseline must be positive"));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(CalibrationError::InvalidDescription("image size must be non-zero"));
        }

        let k = na::Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0);
        log::info!(
            "calibration: fx={fx:.2} fy={fy:.2} cx={cx:.2} cy={cy:.2} baseline={:.1}mm",
            desc.baseline * 1000.0
        );
        Ok(Self {
            k1: k,
            d1: Distortion::default(),
            k2: k,
            d2: Distortion::default(),
            r: na::Matrix3::identity(),
            t: na::Vector3::new(-desc.baseline, 0.0, 0.0),
            q: reprojection_matrix(fx, cx, cy, desc.baseline),
            image_size: Some((desc.width, desc.height)),
        })
    }

    pub fn baseline(&self) -> f64 {
        self.t.norm()
    }

    pub fn left_intrinsics(&self, width: u32, height: u32) -> CameraIntrinsics {
        intrinsics_of(&self.k1, width, height)
    }

    pub fn right_intrinsics(&self, width: u32, height: u32) -> CameraIntrinsics {
        intrinsics_of(&self.k2, width, height)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let text = read(path.as_ref())?;
        let file: BundleFile = serde_json::from_str(&text)?;
        Ok(file.into())
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let path = path.as_ref();
        let io_err = |source| CalibrationError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(&BundleFile::from(self))?;
        std::fs::write(path, text).map_err(io_err)
    }

    /// Loads the bundle at `path`, building and persisting it from `description` on first use.
    pub fn load_or_build(
        path: impl AsRef<Path>,
        description: impl AsRef<Path>,
    ) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        if path.is_file() {
            return Self::from_json_file(path);
        }
        let bundle = Self::from_description(&CalibrationDescription::from_json_file(description)?)?;
        bundle.to_json_file(path)?;
        log::info!("calibration bundle written to {}", path.display());
        Ok(bundle)
    }
}

fn intrinsics_of(k: &na::Matrix3<f64>, width: u32, height: u32) -> CameraIntrinsics {
    CameraIntrinsics {
        fx: k[(0, 0)],
        fy: k[(1, 1)],
        cx: k[(0, 2)],
        cy: k[(1, 2)],
        width,
        height,
    }
}

fn read(path: &Path) -> Result<String, CalibrationError> {
    std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// On-disk layout: named row-major matrices, `D` as 1x5 and `T` as 3x1.
#[derive(Debug, Serialize, Deserialize)]
#[allow(non_snake_case)]
struct BundleFile {
    K1: [[f64; 3]; 3],
    D1: [[f64; 5]; 1],
    K2: [[f64; 3]; 3],
    D2: [[f64; 5]; 1],
    R: [[f64; 3]; 3],
    T: [[f64; 1]; 3],
    Q: [[f64; 4]; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_size: Option<[u32; 2]>,
}

fn rows3(m: &na::Matrix3<f64>) -> [[f64; 3]; 3] {
    std::array::from_fn(|i| std::array::from_fn(|j| m[(i, j)]))
}

fn rows4(m: &na::Matrix4<f64>) -> [[f64; 4]; 4] {
    std::array::from_fn(|i| std::array::from_fn(|j| m[(i, j)]))
}

impl From<&CalibrationBundle> for BundleFile {
    fn from(b: &CalibrationBundle) -> Self {
        Self {
            K1: rows3(&b.k1),
            D1: [b.d1.coeffs()],
            K2: rows3(&b.k2),
            D2: [b.d2.coeffs()],
            R: rows3(&b.r),
            T: [[b.t.x], [b.t.y], [b.t.z]],
            Q: rows4(&b.q),
            image_size: b.image_size.map(|(w, h)| [w, h]),
        }
    }
}

impl From<BundleFile> for CalibrationBundle {
    fn from(f: BundleFile) -> Self {
        let m3 = |rows: [[f64; 3]; 3]| na::Matrix3::from_fn(|i, j| rows[i][j]);
        Self {
            k1: m3(f.K1),
            d1: Distortion::from_coeffs(f.D1[0]),
            k2: m3(f.K2),
            d2: Distortion::from_coeffs(f.D2[0]),
            r: m3(f.R),
            t: na::Vector3::new(f.T[0][0], f.T[1][0], f.T[2][0]),
            q: na::Matrix4::from_fn(|i, j| f.Q[i][j]),
            image_size: f.image_size.map(|[w, h]| (w, h)),
        }
    }
}
