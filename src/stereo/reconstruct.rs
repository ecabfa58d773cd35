//! Dense depth from a rectified pair and sparse triangulation of matched fiducial centers.
use super::calibration::CalibrationBundle;
use super::rectify::StereoRectifier;
use super::sgbm::{self, SgbmParams, StereoSgbm};
use super::StereoError;
use crate::fiducial::{NamedFiducialSet, PinName};
use image::{GrayImage, ImageBuffer, Luma, Rgb, Rgb32FImage};
use nalgebra as na;
use serde::{Deserialize, Serialize};

pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Output of [`StereoReconstructor::reconstruct_depth`]. Pixels without a valid disparity are
/// NaN in `depth` and `points`; `disparity` keeps `min_disparity - 1` there.
#[derive(Debug, Clone)]
pub struct DepthResult {
    pub disparity: FloatImage,
    pub depth: FloatImage,
    pub points: Rgb32FImage,
}

impl DepthResult {
    pub fn valid_fraction(&self) -> f64 {
        let total = self.depth.len();
        if total == 0 {
            return 0.0;
        }
        self.depth.iter().filter(|z| z.is_finite()).count() as f64 / total as f64
    }
}

/// `Q * [x, y, d, 1]` dehomogenized, or `None` when the point is at infinity.
pub fn reproject_point(q: &na::Matrix4<f64>, x: f64, y: f64, disparity: f64) -> Option<na::Point3<f64>> {
    let h = q * na::Vector4::new(x, y, disparity, 1.0);
    if h.w.abs() < 1e-12 {
        return None;
    }
    Some(na::Point3::new(h.x / h.w, h.y / h.w, h.z / h.w))
}

/// Rectifies, matches and reprojects stereo pairs of one size with one calibration.
#[derive(Debug, Clone)]
pub struct StereoReconstructor {
    rectifier: StereoRectifier,
    matcher: StereoSgbm,
}

impl StereoReconstructor {
    pub fn new(
        bundle: &CalibrationBundle,
        width: u32,
        height: u32,
        params: SgbmParams,
    ) -> Result<Self, StereoError> {
        Ok(Self {
            rectifier: StereoRectifier::new(bundle, width, height)?,
            matcher: StereoSgbm::new(params),
        })
    }

    pub fn reconstruct_depth(&self, left: &GrayImage, right: &GrayImage) -> Result<DepthResult, StereoError> {
        let expected = self.rectifier.dimensions();
        for got in [left.dimensions(), right.dimensions()] {
            if got != expected {
                return Err(StereoError::SizeMismatch { expected, got });
            }
        }

        let (left, right) = self.rectifier.rectify(left, right);
        let fixed = self.matcher.compute(&left, &right);
        let disparity = sgbm::to_float(&fixed);
        let min_valid = self.matcher.params().min_disparity as f32;
        let q = self.rectifier.rectification.q;

        let (w, h) = disparity.dimensions();
        let mut depth = FloatImage::from_pixel(w, h, Luma([f32::NAN]));
        let mut points = Rgb32FImage::from_pixel(w, h, Rgb([f32::NAN; 3]));
        for (x, y, d) in disparity.enumerate_pixels() {
            if d[0] < min_valid {
                continue;
            }
            if let Some(p) = reproject_point(&q, x as f64, y as f64, d[0] as f64) {
                points.put_pixel(x, y, Rgb([p.x as f32, p.y as f32, p.z as f32]));
                depth.put_pixel(x, y, Luma([p.z as f32]));
            }
        }

        let result = DepthResult {
            disparity,
            depth,
            points,
        };
        log::info!(
            "dense disparity {w}x{h}: {:.1}% valid",
            100.0 * result.valid_fraction()
        );
        Ok(result)
    }
}

/// Min-max normalized 8-bit rendering of a disparity map.
pub fn disparity_to_png(disparity: &FloatImage) -> GrayImage {
    let (lo, hi) = disparity
        .iter()
        .filter(|d| d.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
    let span = hi - lo;
    let (w, h) = disparity.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let d = disparity.get_pixel(x, y)[0];
        if !d.is_finite() || span <= 0.0 {
            return Luma([0]);
        }
        Luma([((d - lo) / span * 255.0).round() as u8])
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassCenter {
    pub class: i32,
    pub center: [f64; 2],
}

/// Left and right centers paired by class; `left[i]` corresponds to `right[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedCenters {
    pub left: Vec<ClassCenter>,
    pub right: Vec<ClassCenter>,
}

impl MergedCenters {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Pairs every left center with the first right center of the same class.
pub fn merge_by_class(left: &[ClassCenter], right: &[ClassCenter]) -> MergedCenters {
    let mut merged = MergedCenters::default();
    for l in left {
        match right.iter().find(|r| r.class == l.class) {
            Some(r) => {
                merged.left.push(*l);
                merged.right.push(*r);
            }
            None => log::warn!("class {} has no right-image match, dropped", l.class),
        }
    }
    merged
}

/// Pairs the pins present in both sets, in pin order.
pub fn merge_named(left: &NamedFiducialSet, right: &NamedFiducialSet) -> Vec<(PinName, [f64; 2], [f64; 2])> {
    left.points
        .iter()
        .filter_map(|(pin, l)| match right.get(*pin) {
            Some(r) => Some((*pin, l.center(), r.center())),
            None => {
                log::warn!("pin {pin} missing on the {} side, dropped", right.side);
                None
            }
        })
        .collect()
}

/// Triangulated fiducial center in the rectified left camera frame, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3dRecord {
    pub class: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<PinName>,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
}

fn triangulate_pair(q: &na::Matrix4<f64>, class: i32, l: [f64; 2], r: [f64; 2]) -> Option<na::Point3<f64>> {
    let disparity = l[0] - r[0];
    if disparity <= 0.0 {
        log::warn!("class {class}: non-positive disparity {disparity:.3}, skipped");
        return None;
    }
    let p = reproject_point(q, l[0], l[1], disparity);
    if p.is_none() {
        log::warn!("class {class}: point at infinity, skipped");
    }
    p
}

/// Reprojects each class-matched pair through `Q`. Pairs with `x_left - x_right <= 0` are
/// skipped.
pub fn triangulate_matched(merged: &MergedCenters, q: &na::Matrix4<f64>) -> Vec<Point3dRecord> {
    merged
        .left
        .iter()
        .zip(&merged.right)
        .filter_map(|(l, r)| {
            let p = triangulate_pair(q, l.class, l.center, r.center)?;
            Some(Point3dRecord {
                class: l.class,
                pin: None,
                x: p.x,
                y: p.y,
                z: p.z,
            })
        })
        .collect()
}

pub fn triangulate_named(
    left: &NamedFiducialSet,
    right: &NamedFiducialSet,
    q: &na::Matrix4<f64>,
) -> Vec<Point3dRecord> {
    merge_named(left, right)
        .into_iter()
        .filter_map(|(pin, l, r)| {
            let p = triangulate_pair(q, pin.class_id(), l, r)?;
            Some(Point3dRecord {
                class: pin.class_id(),
                pin: Some(pin),
                x: p.x,
                y: p.y,
                z: p.z,
            })
        })
        .collect()
}
