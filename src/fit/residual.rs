use crate::detection::PixelBox;
use crate::geom::ellipse::{EllipseRepr, Parametric, PlanarEllipse};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_line_segment_mut, Canvas};

/// Mean absolute difference, over the box, between the ellipse outline drawn 1px wide and the
/// reference edge map. Both maps are 0/255, so the score lies in `[0, 255]`.
pub fn edge_residual(
    ellipse: &PlanarEllipse<Parametric<f64>>,
    pbox: &PixelBox,
    reference: &GrayImage,
) -> f64 {
    let (w, h) = (pbox.width(), pbox.height());
    if w == 0 || h == 0 {
        return 0.0;
    }

    let mut mask = GrayImage::new(w, h);
    draw_outline(&mut mask, ellipse, pbox.x1 as f64, pbox.y1 as f64, Luma([255u8]));

    let mut total = 0u64;
    for (x, y, m) in mask.enumerate_pixels() {
        let r = reference.get_pixel_checked(x + pbox.x1, y + pbox.y1).map_or(0, |p| p[0]);
        total += m[0].abs_diff(r) as u64;
    }
    total as f64 / (w as u64 * h as u64) as f64
}

/// Draws the closed outline as a polyline, translated by `(-ox, -oy)`.
pub fn draw_outline<C: Canvas>(
    canvas: &mut C,
    ellipse: &PlanarEllipse<Parametric<f64>>,
    ox: f64,
    oy: f64,
    color: C::Pixel,
) {
    // About one vertex per pixel of circumference.
    let n = (std::f64::consts::TAU * ellipse.semi_major()).ceil().max(32.0) as usize;
    let pts = ellipse.sample_boundary(n);
    for (a, b) in pts.iter().zip(pts.iter().cycle().skip(1)) {
        draw_line_segment_mut(
            canvas,
            ((a.x - ox) as f32, (a.y - oy) as f32),
            ((b.x - ox) as f32, (b.y - oy) as f32),
            color,
        );
    }
}
