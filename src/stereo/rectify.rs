//! Epipolar rectification of a calibrated pair and the per-pixel resampling maps.
use super::calibration::{CalibrationBundle, CalibrationError};
use crate::camera::Distortion;
use crate::geom::transform::rotation_to_rvec;
use image::{GrayImage, ImageBuffer, Luma};
use nalgebra as na;

pub type MapImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Rectifying rotations, new projection matrices and the rectified `Q`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rectification {
    pub r1: na::Matrix3<f64>,
    pub r2: na::Matrix3<f64>,
    pub p1: na::Matrix3x4<f64>,
    pub p2: na::Matrix3x4<f64>,
    pub q: na::Matrix4<f64>,
}

/// Bouguet rectification with both principal points forced equal (zero disparity at infinity).
///
/// Each camera is rotated half way towards the other, then both are turned so the baseline lies
/// on the x axis. The new focal length is the smaller of the two `fy`, with no further scaling.
pub fn stereo_rectify(
    bundle: &CalibrationBundle,
    width: u32,
    height: u32,
) -> Result<Rectification, CalibrationError> {
    let half = na::Rotation3::new(rotation_to_rvec(&bundle.r) * -0.5).into_inner();
    let t = half * bundle.t;
    if t.x.abs() <= t.y.abs() {
        return Err(CalibrationError::NotHorizontal([t.x, t.y, t.z]));
    }

    let axis = na::Vector3::new(t.x.signum(), 0.0, 0.0);
    let mut w = t.cross(&axis);
    let nw = w.norm();
    if nw > 0.0 {
        w *= (t.x.abs() / t.norm()).acos() / nw;
    }
    let align = na::Rotation3::new(w).into_inner();
    let r1 = align * half.transpose();
    let r2 = align * half;
    let t_new = r2 * bundle.t;

    let f = bundle.k1[(1, 1)].min(bundle.k2[(1, 1)]);
    let center = na::Vector2::new((width as f64 - 1.0) / 2.0, (height as f64 - 1.0) / 2.0);
    let cc1 = center - mean_projected_corner(&bundle.k1, &bundle.d1, &r1, f, width, height);
    let cc2 = center - mean_projected_corner(&bundle.k2, &bundle.d2, &r2, f, width, height);
    let cc = (cc1 + cc2) / 2.0;

    let p = |tx: f64| {
        na::Matrix3x4::new(f, 0.0, cc.x, tx * f, 0.0, f, cc.y, 0.0, 0.0, 0.0, 1.0, 0.0)
    };
    let q = na::Matrix4::new(
        1.0, 0.0, 0.0, -cc.x,
        0.0, 1.0, 0.0, -cc.y,
        0.0, 0.0, 0.0, f,
        0.0, 0.0, -1.0 / t_new.x, 0.0,
    );

    Ok(Rectification {
        r1,
        r2,
        p1: p(0.0),
        p2: p(t_new.x),
        q,
    })
}

/// Mean of the four image corners after undistortion, rotation and projection with focal `f`
/// and a zero principal point.
fn mean_projected_corner(
    k: &na::Matrix3<f64>,
    d: &Distortion,
    r: &na::Matrix3<f64>,
    f: f64,
    width: u32,
    height: u32,
) -> na::Vector2<f64> {
    let (w, h) = ((width as f64 - 1.0).max(0.0), (height as f64 - 1.0).max(0.0));
    let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)];
    let sum = corners.iter().fold(na::Vector2::zeros(), |acc, &(u, v)| {
        let n = na::Point2::new((u - k[(0, 2)]) / k[(0, 0)], (v - k[(1, 2)]) / k[(1, 1)]);
        let n = d.undistort(&n);
        let ray = r * na::Vector3::new(n.x, n.y, 1.0);
        acc + na::Vector2::new(f * ray.x / ray.z, f * ray.y / ray.z)
    });
    sum / 4.0
}

/// Source coordinates to sample for every rectified output pixel.
#[derive(Debug, Clone)]
pub struct RectifyMap {
    map_x: MapImage,
    map_y: MapImage,
    identity: bool,
}

impl RectifyMap {
    /// Inverse mapping `rectified pixel -> rotated ray -> distorted source pixel`.
    pub fn new(
        k: &na::Matrix3<f64>,
        d: &Distortion,
        r: &na::Matrix3<f64>,
        p: &na::Matrix3x4<f64>,
        width: u32,
        height: u32,
    ) -> Self {
        let new_k = p.fixed_view::<3, 3>(0, 0).into_owned();
        let identity = d.is_zero()
            && (r - na::Matrix3::identity()).abs().max() < 1e-12
            && (new_k - k).abs().max() < 1e-9;

        let (f, cx, cy) = (new_k[(0, 0)], new_k[(0, 2)], new_k[(1, 2)]);
        let fy = new_k[(1, 1)];
        let rt = r.transpose();
        let mut map_x = MapImage::new(width, height);
        let mut map_y = MapImage::new(width, height);
        for v in 0..height {
            for u in 0..width {
                let ray = rt * na::Vector3::new((u as f64 - cx) / f, (v as f64 - cy) / fy, 1.0);
                let src = d.distort(&na::Point2::new(ray.x / ray.z, ray.y / ray.z));
                map_x.put_pixel(u, v, Luma([(k[(0, 0)] * src.x + k[(0, 2)]) as f32]));
                map_y.put_pixel(u, v, Luma([(k[(1, 1)] * src.y + k[(1, 2)]) as f32]));
            }
        }
        Self {
            map_x,
            map_y,
            identity,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.map_x.dimensions()
    }

    /// Bilinear resampling; samples falling outside the source read as black.
    pub fn remap(&self, src: &GrayImage) -> GrayImage {
        if self.identity && src.dimensions() == self.dimensions() {
            return src.clone();
        }
        let (w, h) = self.dimensions();
        GrayImage::from_fn(w, h, |u, v| {
            let x = self.map_x.get_pixel(u, v)[0];
            let y = self.map_y.get_pixel(u, v)[0];
            Luma([bilinear(src, x, y)])
        })
    }
}

fn bilinear(src: &GrayImage, x: f32, y: f32) -> u8 {
    let (w, h) = src.dimensions();
    let (x0, y0) = (x.floor(), y.floor());
    let (ax, ay) = (x - x0, y - y0);
    let sample = |xi: f32, yi: f32| -> f32 {
        if xi < 0.0 || yi < 0.0 || xi >= w as f32 || yi >= h as f32 {
            0.0
        } else {
            src.get_pixel(xi as u32, yi as u32)[0] as f32
        }
    };
    let top = sample(x0, y0) * (1.0 - ax) + sample(x0 + 1.0, y0) * ax;
    let bottom = sample(x0, y0 + 1.0) * (1.0 - ax) + sample(x0 + 1.0, y0 + 1.0) * ax;
    (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8
}

/// Rectification of one rig at one image size, computed once and shared across frames.
#[derive(Debug, Clone)]
pub struct StereoRectifier {
    pub rectification: Rectification,
    left: RectifyMap,
    right: RectifyMap,
}

impl StereoRectifier {
    pub fn new(bundle: &CalibrationBundle, width: u32, height: u32) -> Result<Self, CalibrationError> {
        let rectification = stereo_rectify(bundle, width, height)?;
        let left = RectifyMap::new(
            &bundle.k1,
            &bundle.d1,
            &rectification.r1,
            &rectification.p1,
            width,
            height,
        );
        let right = RectifyMap::new(
            &bundle.k2,
            &bundle.d2,
            &rectification.r2,
            &rectification.p2,
            width,
            height,
        );
        log::debug!(
            "rectifier {width}x{height}: identity maps left={} right={}",
            left.is_identity(),
            right.is_identity()
        );
        Ok(Self {
            rectification,
            left,
            right,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.left.dimensions()
    }

    pub fn rectify(&self, left: &GrayImage, right: &GrayImage) -> (GrayImage, GrayImage) {
        rayon::join(|| self.left.remap(left), || self.right.remap(right))
    }
}
