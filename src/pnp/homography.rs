//! Normalized DLT homography between two planar point sets.
use nalgebra as na;

/// Similarity moving the centroid to the origin with mean distance `sqrt(2)`.
fn normalizing_transform(points: &[na::Point2<f64>]) -> Option<na::Matrix3<f64>> {
    let n = points.len() as f64;
    let mean = points.iter().fold(na::Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let spread = points.iter().map(|p| (p.coords - mean).norm()).sum::<f64>() / n;
    if spread <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / spread;
    Some(na::Matrix3::new(
        s, 0.0, -s * mean.x,
        0.0, s, -s * mean.y,
        0.0, 0.0, 1.0,
    ))
}

fn apply(t: &na::Matrix3<f64>, p: &na::Point2<f64>) -> na::Point2<f64> {
    let h = t * p.to_homogeneous();
    na::Point2::new(h.x / h.z, h.y / h.z)
}

/// Estimates `H` with `dst ~ H src` from at least four correspondences. Returns `None` for
/// degenerate input.
pub fn dlt_homography(src: &[na::Point2<f64>], dst: &[na::Point2<f64>]) -> Option<na::Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }
    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    // Pad to at least 9 rows so the SVD yields a full V.
    let mut a = na::DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let (s, d) = (apply(&t_src, s), apply(&t_dst, d));
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let (r0, r1) = (2 * i, 2 * i + 1);

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = v_t.row(smallest);
    let h_norm = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let h = t_dst.try_inverse()? * h_norm * t_src;
    let scale = h[(2, 2)];
    if !h.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(if scale.abs() > f64::EPSILON { h / scale } else { h })
}
