//! Detector output: bounding boxes with a class id and confidence, as written by the external
//! object detector.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to read detections from {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed detection JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Axis-aligned box in pixel space, `(x1, y1)` top-left and `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Grows the box by `margin` on every side and clamps it to a `width` x `height` image.
    ///
    /// Coordinates are clamped to `[0, dim - 1]` and truncated. A box that collapses is widened
    /// to span at least one pixel.
    pub fn expand_and_clamp(&self, margin: u32, width: u32, height: u32) -> PixelBox {
        let m = margin as f64;
        let clamp = |v: f64, dim: u32| v.clamp(0.0, dim.saturating_sub(1) as f64) as u32;
        let (mut x1, mut x2) = (clamp(self.x1 - m, width), clamp(self.x2 + m, width));
        let (mut y1, mut y2) = (clamp(self.y1 - m, height), clamp(self.y2 + m, height));
        widen(&mut x1, &mut x2, width);
        widen(&mut y1, &mut y2, height);
        PixelBox { x1, y1, x2, y2 }
    }
}

fn widen(lo: &mut u32, hi: &mut u32, dim: u32) {
    if *hi <= *lo {
        *hi = (*lo + 1).min(dim.saturating_sub(1));
    }
    if *hi <= *lo {
        *lo = hi.saturating_sub(1);
    }
}

/// Integer box addressing the half-open pixel range `[x1, x2) x [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl From<[u32; 4]> for PixelBox {
    fn from([x1, y1, x2, y2]: [u32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<PixelBox> for [u32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }
}

/// One detector output: a box, its confidence and the class id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub confidence: f64,
    #[serde(rename = "class", default = "unknown_class")]
    pub class_id: i32,
}

fn unknown_class() -> i32 {
    -1
}

impl DetectionBox {
    pub fn new(bbox: BoundingBox, confidence: f64, class_id: i32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Parses a detector JSON array, `[{"bbox": [x1, y1, x2, y2], "confidence": c, "class": k}]`.
///
/// Missing confidences default to `0.0` and missing classes to `-1`.
pub fn parse_detections(json: &str) -> Result<Vec<DetectionBox>, DetectionError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_detections(path: impl AsRef<Path>) -> Result<Vec<DetectionBox>, DetectionError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| DetectionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let boxes = parse_detections(&text)?;
    log::debug!("loaded {} detections from {}", boxes.len(), path.display());
    Ok(boxes)
}
