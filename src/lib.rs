pub mod camera;
pub mod config;
pub mod detection;
mod error;
pub mod fiducial;
pub mod fit;
pub mod geom;
pub mod math;
pub mod model;
pub mod pipeline;
pub mod pnp;
pub mod stereo;

pub use error::{Error, Result};
pub use fiducial::{NamedFiducialSet, PinName, Side};
pub use fit::{EllipseFitter, EllipseResult, FitterConfig};
pub use pnp::{Pose, PnpConfig, PnpMethod};
