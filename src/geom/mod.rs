pub mod ellipse;
pub mod transform;
