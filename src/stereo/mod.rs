//! Stereo calibration, rectification, dense matching and triangulation.
pub mod calibration;
pub mod reconstruct;
pub mod rectify;
pub mod sgbm;

pub use calibration::{CalibrationBundle, CalibrationDescription, CalibrationError};
pub use reconstruct::{
    merge_by_class, triangulate_matched, triangulate_named, ClassCenter, DepthResult, MergedCenters,
    Point3dRecord, StereoReconstructor,
};
pub use rectify::StereoRectifier;
pub use sgbm::{SgbmParams, StereoSgbm};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StereoError {
    #[error("Stereo image is {got:?}, the rectifier was built for {expected:?}")]
    SizeMismatch { expected: (u32, u32), got: (u32, u32) },

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}
