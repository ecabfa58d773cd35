pub mod planar;

pub use planar::{EllipseRepr, Parametric, PlanarEllipse, PlanarEllipseError, Quadratic};
