//! Sub-pixel ellipse fitting of circular fiducials inside detector boxes.
//!
//! Each box is grown by a margin, edge-detected, traced for external contours and fitted with a
//! direct least-squares ellipse. The fit is scored against a global reference edge map.
pub mod contour;
pub mod edges;
pub mod residual;

use crate::detection::{DetectionBox, PixelBox};
use crate::geom::ellipse::{EllipseRepr, Parametric, PlanarEllipse};
use crate::math::conic::MIN_FIT_POINTS;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Class id of the hub box, which holds several sub-fiducials.
pub const HUB_CLASS: i32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitterConfig {
    /// Pixels added on every side of a detector box.
    pub margin_px: u32,
    /// Canny thresholds of the global reference edge map.
    pub canny_low: f32,
    pub canny_high: f32,
    /// Canny thresholds inside a box, low enough for faint outlines.
    pub roi_canny_low: f32,
    pub roi_canny_high: f32,
    /// Gaussian sigma applied to the crop before edge detection, 0 disables.
    pub blur_sigma: f32,
    pub equalize_histogram: bool,
    pub gamma: Option<f32>,
    /// Half-size, as a fraction of the crop, of the central block cleared in hub edge maps.
    pub hub_center_suppression: Option<f32>,
    /// Radius of the square morphological closing applied to crop edges.
    pub close_radius: Option<u8>,
    /// Share of the crop a single-fiducial contour is expected to enclose. The largest contour is
    /// always fitted; a winner below this share is logged.
    pub min_area_fraction: Option<f64>,
    pub hub_class: i32,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            margin_px: 5,
            canny_low: 80.0,
            canny_high: 200.0,
            roi_canny_low: 10.0,
            roi_canny_high: 60.0,
            blur_sigma: 0.8,
            equalize_histogram: false,
            gamma: None,
            hub_center_suppression: None,
            close_radius: None,
            min_area_fraction: None,
            hub_class: HUB_CLASS,
        }
    }
}

/// One fitted fiducial, in full-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipseResult {
    pub cls: i32,
    pub confidence: f64,
    /// Expanded and clamped box the fit was made in.
    pub bbox: PixelBox,
    pub cx: f64,
    pub cy: f64,
    /// Full length of the major axis.
    pub major: f64,
    /// Full length of the minor axis.
    pub minor: f64,
    /// Direction of the major axis in degrees, in `[0, 180)`.
    pub angle_deg: f64,
    pub residual: f64,
}

impl EllipseResult {
    pub fn center(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    pub fn ellipse(&self) -> PlanarEllipse<Parametric<f64>> {
        PlanarEllipse::from_parameters(
            self.major / 2.0,
            self.minor / 2.0,
            self.angle_deg.to_radians(),
            self.cx,
            self.cy,
        )
    }
}

/// Outcome of fitting one box: ordinary classes give one ellipse, the hub gives several.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxFit {
    One(EllipseResult),
    Many(Vec<EllipseResult>),
}

#[derive(Debug, Clone, Default)]
pub struct EllipseFitter {
    config: FitterConfig,
}

impl EllipseFitter {
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }

    pub fn reference_edges(&self, gray: &GrayImage) -> GrayImage {
        edges::reference_edges(gray, &self.config)
    }

    /// Fits the fiducial(s) inside one detector box.
    ///
    /// Returns `None` when no contour yields an ellipse. This is a normal outcome for a box and
    /// is only logged.
    pub fn fit_box(
        &self,
        gray: &GrayImage,
        reference: &GrayImage,
        det: &DetectionBox,
    ) -> Option<BoxFit> {
        let (w, h) = gray.dimensions();
        let pbox = det.bbox.expand_and_clamp(self.config.margin_px, w, h);
        let is_hub = det.class_id == self.config.hub_class;

        let roi = edges::crop(gray, &pbox);
        let roi_edges = edges::roi_edges(&roi, &self.config, is_hub);
        let contours: Vec<_> = contour::external_contours(&roi_edges)
            .into_iter()
            .filter(|c| c.len() >= MIN_FIT_POINTS)
            .collect();

        if is_hub {
            let fits: Vec<_> = contours
                .iter()
                .filter_map(|c| self.fit_contour(c, det, &pbox, reference))
                .collect();
            log::debug!(
                "class {} box {:?}: {} of {} hub contours fitted",
                det.class_id,
                pbox,
                fits.len(),
                contours.len()
            );
            return (!fits.is_empty()).then_some(BoxFit::Many(fits));
        }

        let Some((area, best)) = contours
            .iter()
            .map(|c| (contour::polygon_area(c), c))
            .max_by(|a, b| a.0.total_cmp(&b.0))
        else {
            log::debug!(
                "class {} box {:?}: no contour with at least {MIN_FIT_POINTS} points",
                det.class_id,
                pbox
            );
            return None;
        };
        // Contours under the area fraction only win when nothing larger exists.
        if let Some(fraction) = self.config.min_area_fraction {
            if area <= fraction * pbox.area() as f64 {
                log::debug!(
                    "class {} box {:?}: no contour above {:.0}% of the box, using the largest",
                    det.class_id,
                    pbox,
                    fraction * 100.0
                );
            }
        }
        self.fit_contour(best, det, &pbox, reference).map(BoxFit::One)
    }

    fn fit_contour(
        &self,
        points: &[[f64; 2]],
        det: &DetectionBox,
        pbox: &PixelBox,
        reference: &GrayImage,
    ) -> Option<EllipseResult> {
        if contour::polygon_area(points) <= 0.0 {
            log::debug!("class {}: skipping zero-area contour", det.class_id);
            return None;
        }
        let local = match PlanarEllipse::<Parametric<f64>>::fit_points(points) {
            Ok(e) => e,
            Err(e) => {
                log::debug!("class {}: ellipse fit failed: {e}", det.class_id);
                return None;
            }
        };
        let (lx, ly) = local.center().ok()?;
        let (a, b, theta) = (local.semi_major(), local.semi_minor(), local.rotation());
        if ![a, b, theta, lx, ly].iter().all(|v| v.is_finite()) {
            log::debug!("class {}: non-finite ellipse parameters", det.class_id);
            return None;
        }
        let ellipse = PlanarEllipse::from_parameters(
            a,
            b,
            theta,
            lx + pbox.x1 as f64,
            ly + pbox.y1 as f64,
        );
        let (cx, cy) = ellipse.center().ok()?;
        let residual = residual::edge_residual(&ellipse, pbox, reference);

        Some(EllipseResult {
            cls: det.class_id,
            confidence: det.confidence,
            bbox: *pbox,
            cx,
            cy,
            major: 2.0 * a,
            minor: 2.0 * b,
            angle_deg: theta.to_degrees().rem_euclid(180.0),
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use approx::assert_relative_eq;
    use image::Luma;
    use imageproc::drawing::draw_polygon_mut;
    use imageproc::point::Point;

    /// White background with a dark filled ellipse.
    fn solid_ellipse_image(w: u32, h: u32, ellipse: &PlanarEllipse<Parametric<f64>>) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([230]));
        let poly: Vec<Point<i32>> = ellipse
            .sample_boundary(720)
            .iter()
            .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
            .collect::<Vec<_>>()
            .into_iter()
            .fold(Vec::new(), |mut acc, p| {
                if acc.last() != Some(&p) && acc.first() != Some(&p) {
                    acc.push(p);
                }
                acc
            });
        draw_polygon_mut(&mut img, &poly, Luma([25]));
        img
    }

    #[test]
    fn test_recovers_synthetic_ellipse() {
        let truth = PlanarEllipse::from_parameters(120.0, 80.0, 30f64.to_radians(), 250.0, 200.0);
        let img = solid_ellipse_image(500, 400, &truth);
        let fitter = EllipseFitter::default();
        let reference = fitter.reference_edges(&img);
        let det = DetectionBox::new(BoundingBox::new(130.0, 100.0, 370.0, 300.0), 0.95, 3);

        let Some(BoxFit::One(r)) = fitter.fit_box(&img, &reference, &det) else {
            panic!("expected a single ellipse");
        };
        assert!((r.cx - 250.0).abs() < 1.0, "cx {}", r.cx);
        assert!((r.cy - 200.0).abs() < 1.0, "cy {}", r.cy);
        assert_relative_eq!(r.major, 240.0, max_relative = 0.02);
        assert_relative_eq!(r.minor, 160.0, max_relative = 0.02);
        assert!((r.angle_deg - 30.0).abs() < 2.0, "angle {}", r.angle_deg);
        assert_eq!(r.cls, 3);
        assert_eq!(r.bbox, PixelBox { x1: 125, y1: 95, x2: 375, y2: 305 });
        assert!(r.residual < 255.0);
    }

    /// Several dark ellipses `(a, b, x, y)` on one white background.
    fn discs_image(w: u32, h: u32, discs: &[(f64, f64, f64, f64)]) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([230]));
        for &(a, b, x, y) in discs {
            let sub = solid_ellipse_image(w, h, &PlanarEllipse::from_parameters(a, b, 0.0, x, y));
            for (dst, src) in img.pixels_mut().zip(sub.pixels()) {
                dst.0[0] = dst.0[0].min(src.0[0]);
            }
        }
        img
    }

    #[test]
    fn test_hub_box_yields_every_sub_ellipse() {
        let img = discs_image(
            300,
            200,
            &[
                (14.0, 12.0, 80.0, 70.0),
                (14.0, 12.0, 150.0, 70.0),
                (14.0, 12.0, 220.0, 70.0),
                (14.0, 12.0, 115.0, 130.0),
            ],
        );
        let fitter = EllipseFitter::default();
        let reference = fitter.reference_edges(&img);
        let det = DetectionBox::new(BoundingBox::new(50.0, 40.0, 250.0, 160.0), 0.8, HUB_CLASS);

        let Some(BoxFit::Many(fits)) = fitter.fit_box(&img, &reference, &det) else {
            panic!("expected several ellipses");
        };
        assert_eq!(fits.len(), 4);
        assert!(fits.iter().all(|f| f.cls == HUB_CLASS));
        assert!(fits
            .iter()
            .any(|f| (f.cx - 115.0).abs() < 1.0 && (f.cy - 130.0).abs() < 1.0));
    }

    #[test]
    fn test_hub_center_suppression_drops_inner_blob() {
        // The crop of the hub box below is centered on (150, 100).
        let img = discs_image(
            300,
            200,
            &[
                (14.0, 12.0, 80.0, 60.0),
                (14.0, 12.0, 150.0, 55.0),
                (14.0, 12.0, 220.0, 60.0),
                (14.0, 12.0, 100.0, 140.0),
                (5.0, 5.0, 150.0, 100.0),
            ],
        );
        let det = DetectionBox::new(BoundingBox::new(50.0, 40.0, 250.0, 160.0), 0.8, HUB_CLASS);
        let near_center = |f: &EllipseResult| (f.cx - 150.0).abs() < 2.0 && (f.cy - 100.0).abs() < 2.0;

        let plain = EllipseFitter::default();
        let Some(BoxFit::Many(fits)) = plain.fit_box(&img, &plain.reference_edges(&img), &det) else {
            panic!("expected several ellipses");
        };
        assert_eq!(fits.len(), 5);
        assert!(fits.iter().any(near_center));

        let suppressing = EllipseFitter::new(FitterConfig {
            hub_center_suppression: Some(0.15),
            ..FitterConfig::default()
        });
        let reference = suppressing.reference_edges(&img);
        let Some(BoxFit::Many(fits)) = suppressing.fit_box(&img, &reference, &det) else {
            panic!("expected several ellipses");
        };
        assert_eq!(fits.len(), 4);
        assert!(!fits.iter().any(near_center));
    }

    #[test]
    fn test_area_fraction_keeps_outline_over_small_blob() {
        let img = discs_image(200, 200, &[(60.0, 40.0, 100.0, 100.0), (4.0, 4.0, 35.0, 35.0)]);
        let det = DetectionBox::new(BoundingBox::new(20.0, 20.0, 180.0, 180.0), 0.9, 3);

        for fraction in [0.15, 0.9] {
            let fitter = EllipseFitter::new(FitterConfig {
                min_area_fraction: Some(fraction),
                ..FitterConfig::default()
            });
            let reference = fitter.reference_edges(&img);
            let Some(BoxFit::One(r)) = fitter.fit_box(&img, &reference, &det) else {
                panic!("expected a single ellipse with fraction {fraction}");
            };
            assert!((r.cx - 100.0).abs() < 1.0, "cx {}", r.cx);
            assert!((r.cy - 100.0).abs() < 1.0, "cy {}", r.cy);
            assert_relative_eq!(r.major, 120.0, max_relative = 0.03);
        }

        // Only the blob is inside this box, so it is still fitted below the fraction.
        let fitter = EllipseFitter::new(FitterConfig {
            min_area_fraction: Some(0.15),
            ..FitterConfig::default()
        });
        let reference = fitter.reference_edges(&img);
        let det = DetectionBox::new(BoundingBox::new(25.0, 25.0, 45.0, 45.0), 0.9, 3);
        let Some(BoxFit::One(r)) = fitter.fit_box(&img, &reference, &det) else {
            panic!("expected the blob");
        };
        assert!((r.cx - 35.0).abs() < 1.0 && (r.cy - 35.0).abs() < 1.0);
    }

    #[test]
    fn test_blank_box_has_no_fit() {
        let img = GrayImage::from_pixel(100, 100, Luma([128]));
        let fitter = EllipseFitter::default();
        let reference = fitter.reference_edges(&img);
        let det = DetectionBox::new(BoundingBox::new(20.0, 20.0, 60.0, 60.0), 0.5, 5);
        assert!(fitter.fit_box(&img, &reference, &det).is_none());
    }
}
