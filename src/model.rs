//! CAD reference coordinates of the pins in the connector frame.
use crate::fiducial::PinName;
use nalgebra as na;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read reference model {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed reference model: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reference model has no point for pin {0}")]
    MissingPin(PinName),
}

/// Built-in layout in centimeters, hub center at the origin.
const FALLBACK_CM: [(PinName, [f64; 3]); 8] = [
    (PinName::Center, [0.0, 0.0, 0.0]),
    (PinName::L2, [-0.785, 0.68, 0.0]),
    (PinName::L1, [0.785, 0.68, 0.0]),
    (PinName::CP, [-1.065, -0.56, 0.0]),
    (PinName::CS, [1.065, -0.56, 0.0]),
    (PinName::PE, [0.0, -1.08, 0.0]),
    (PinName::DcMinus, [-1.3, -4.2, 0.0]),
    (PinName::DcPlus, [1.3, -4.2, 0.0]),
];

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    unit: Option<String>,
    points: BTreeMap<String, [f64; 3]>,
}

/// Meters per unit of a model file. Unrecognized units are taken as meters.
pub fn unit_scale(unit: Option<&str>) -> f64 {
    match unit.map(str::to_lowercase).as_deref() {
        Some("cm" | "centimeter" | "centimeters") => 0.01,
        Some("mm" | "millimeter" | "millimeters") => 0.001,
        _ => 1.0,
    }
}

/// Pin coordinates in meters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceObjectModel {
    points: BTreeMap<PinName, na::Point3<f64>>,
}

impl ReferenceObjectModel {
    pub fn fallback() -> Self {
        let points = FALLBACK_CM
            .iter()
            .map(|(pin, p)| (*pin, na::Point3::from(na::Vector3::from(*p) * 0.01)))
            .collect();
        Self { points }
    }

    /// Parses `{"unit": "cm", "points": {"center": [x, y, z], ...}}`. Every pin must be present.
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let file: ModelFile = serde_json::from_str(json)?;
        let scale = unit_scale(file.unit.as_deref());

        let mut points = BTreeMap::new();
        for (name, xyz) in &file.points {
            match name.parse::<PinName>() {
                Ok(pin) => {
                    points.insert(pin, na::Point3::from(na::Vector3::from(*xyz) * scale));
                }
                Err(e) => log::debug!("reference model: {e}, ignored"),
            }
        }
        if let Some(pin) = PinName::ALL.into_iter().find(|p| !points.contains_key(p)) {
            return Err(ModelError::MissingPin(pin));
        }
        Ok(Self { points })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Loads `path` when given and present on disk, else the built-in layout.
    pub fn load_or_fallback(path: Option<&Path>) -> Result<Self, ModelError> {
        match path {
            Some(p) if p.is_file() => Self::from_json_file(p),
            Some(p) => {
                log::warn!("reference model {} not found, using built-in layout", p.display());
                Ok(Self::fallback())
            }
            None => Ok(Self::fallback()),
        }
    }

    pub fn get(&self, pin: PinName) -> Option<&na::Point3<f64>> {
        self.points.get(&pin)
    }

    pub fn points(&self) -> &BTreeMap<PinName, na::Point3<f64>> {
        &self.points
    }
}

impl Default for ReferenceObjectModel {
    fn default() -> Self {
        Self::fallback()
    }
}
