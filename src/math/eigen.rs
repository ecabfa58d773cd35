//! Small dense helpers for the 3×3 eigenproblem behind the direct conic fit.
use nalgebra as na;

/// Real roots of the monic cubic `x³ + b x² + c x + d = 0`, via the depressed form.
pub(crate) fn real_cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    let p = c - b * b / 3.0;
    let q = 2.0 * b.powi(3) / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;

    let disc = -4.0 * p.powi(3) - 27.0 * q * q;
    if disc >= 0.0 {
        let r = (-p / 3.0).max(0.0).sqrt();
        let phi = if r < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r.powi(3))).clamp(-1.0, 1.0).acos()
        };
        (0..3)
            .map(|k| {
                let angle = (phi + 2.0 * std::f64::consts::PI * k as f64) / 3.0;
                2.0 * r * angle.cos() + shift
            })
            .collect()
    } else {
        let root = (q * q / 4.0 + p.powi(3) / 27.0).sqrt();
        vec![(-q / 2.0 + root).cbrt() + (-q / 2.0 - root).cbrt() + shift]
    }
}

/// Eigenvalues of a general (non-symmetric) 3×3 matrix restricted to the real ones.
pub(crate) fn real_eigenvalues(m: &na::Matrix3<f64>) -> Vec<f64> {
    let trace = m.trace();
    let minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
        + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    real_cubic_roots(-trace, minors, -m.determinant())
}

/// Unit right null vector of a rank-deficient 3×3 matrix.
///
/// Every column of the adjugate lies in the null space of a rank-2 matrix, so the
/// largest one is the best conditioned estimate.
pub(crate) fn null_vector(m: &na::Matrix3<f64>) -> Option<na::Vector3<f64>> {
    let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        m[(r0, c0)] * m[(r1, c1)] - m[(r0, c1)] * m[(r1, c0)]
    };
    let candidates = [
        na::Vector3::new(cofactor(1, 2, 1, 2), -cofactor(1, 2, 0, 2), cofactor(1, 2, 0, 1)),
        na::Vector3::new(-cofactor(0, 2, 1, 2), cofactor(0, 2, 0, 2), -cofactor(0, 2, 0, 1)),
        na::Vector3::new(cofactor(0, 1, 1, 2), -cofactor(0, 1, 0, 2), cofactor(0, 1, 0, 1)),
    ];

    let best = candidates
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let norm = best.norm();
    (norm > 1e-15).then(|| best / norm)
}
