//! Edge maps: the global reference map used for scoring and the per-box map contours are traced
//! on.
use super::FitterConfig;
use crate::detection::PixelBox;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;

/// Canny edges of the whole frame with the reference thresholds.
pub fn reference_edges(gray: &GrayImage, config: &FitterConfig) -> GrayImage {
    imageproc::edges::canny(gray, config.canny_low, config.canny_high)
}

/// Copies the half-open box region out of a frame.
pub fn crop(gray: &GrayImage, pbox: &PixelBox) -> GrayImage {
    image::imageops::crop_imm(gray, pbox.x1, pbox.y1, pbox.width(), pbox.height()).to_image()
}

/// Edge map of a box crop, tuned for faint fiducial outlines.
pub fn roi_edges(roi: &GrayImage, config: &FitterConfig, is_hub: bool) -> GrayImage {
    let mut gray = if config.equalize_histogram {
        imageproc::contrast::equalize_histogram(roi)
    } else {
        roi.clone()
    };
    if let Some(gamma) = config.gamma {
        apply_gamma(&mut gray, gamma);
    }
    if config.blur_sigma > 0.0 {
        gray = imageproc::filter::gaussian_blur_f32(&gray, config.blur_sigma);
    }

    let mut edges = imageproc::edges::canny(&gray, config.roi_canny_low, config.roi_canny_high);
    if is_hub {
        if let Some(fraction) = config.hub_center_suppression {
            suppress_center(&mut edges, fraction);
        }
    }
    if let Some(radius) = config.close_radius {
        edges = imageproc::morphology::close(&edges, Norm::LInf, radius);
    }
    edges
}

fn apply_gamma(img: &mut GrayImage, gamma: f32) {
    let lut: Vec<u8> = (0..=255u8)
        .map(|v| ((v as f32 / 255.0).powf(1.0 / gamma) * 255.0) as u8)
        .collect();
    for p in img.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
}

/// Clears a centered rectangle spanning `2 * fraction` of each dimension.
fn suppress_center(edges: &mut GrayImage, fraction: f32) {
    let (w, h) = edges.dimensions();
    let (half_w, half_h) = ((w as f32 * fraction) as u32, (h as f32 * fraction) as u32);
    let (cx, cy) = (w / 2, h / 2);
    for y in cy.saturating_sub(half_h)..(cy + half_h).min(h) {
        for x in cx.saturating_sub(half_w)..(cx + half_w).min(w) {
            edges.put_pixel(x, y, Luma([0]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_matches_box() {
        let img = GrayImage::from_fn(20, 10, |x, y| Luma([(x + 20 * y) as u8]));
        let roi = crop(&img, &PixelBox { x1: 3, y1: 2, x2: 8, y2: 6 });
        assert_eq!(roi.dimensions(), (5, 4));
        assert_eq!(roi.get_pixel(0, 0)[0], 43);
    }

    #[test]
    fn test_center_suppression() {
        let mut edges = GrayImage::from_pixel(20, 20, Luma([255]));
        suppress_center(&mut edges, 0.15);
        assert_eq!(edges.get_pixel(10, 10)[0], 0);
        assert_eq!(edges.get_pixel(7, 7)[0], 0);
        assert_eq!(edges.get_pixel(6, 6)[0], 255);
        assert_eq!(edges.get_pixel(13, 13)[0], 255);
    }

    #[test]
    fn test_flat_roi_has_no_edges() {
        let roi = GrayImage::from_pixel(30, 30, Luma([128]));
        let edges = roi_edges(&roi, &FitterConfig::default(), false);
        assert!(edges.pixels().all(|p| p[0] == 0));
    }
}
