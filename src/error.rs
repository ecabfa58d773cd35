use crate::camera::CameraError;
use crate::detection::DetectionError;
use crate::geom::ellipse::PlanarEllipseError;
use crate::math::conic::EllipseMatrixError;
use crate::model::ModelError;
use crate::pnp::PnpError;
use crate::stereo::{CalibrationError, StereoError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    EllipseMatrix(#[from] EllipseMatrixError),

    #[error(transparent)]
    PlanarEllipse(#[from] PlanarEllipseError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Stereo(#[from] StereoError),

    #[error(transparent)]
    Pnp(#[from] PnpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
