pub mod conic;
pub(crate) mod eigen;
