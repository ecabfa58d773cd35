use crate::math::eigen;
use nalgebra as na;
use thiserror::Error;

/// Fewest boundary points that still pin down a conic.
pub const MIN_FIT_POINTS: usize = 5;

#[derive(Error, Debug)]
pub enum EllipseMatrixError {
    #[error("Matrix is degenerate, det={0}")]
    Degenerate(f64),

    #[error("Matrix does not define an ellipse, det(A33)={0}")]
    NotAnEllipse(f64),

    #[error("At least {MIN_FIT_POINTS} points are needed to fit an ellipse, got {0}")]
    TooFewPoints(usize),

    #[error("Least-squares system has no elliptic solution")]
    NoEllipticSolution,
}

/// Builds the symmetric conic matrix of an ellipse with semi-axes `a`, `b`, major axis rotated
/// by `theta` and centered at `(x, y)`.
///
/// The matrix is scaled by `a²b²` so that a unit circle maps to `diag(1, 1, -1)`.
pub fn compute_matrix<F: na::RealField + Copy>(a: F, b: F, theta: F, x: F, y: F) -> na::Matrix3<F> {
    let (sin, cos) = theta.sin_cos();
    let rot = na::Matrix2::new(cos, -sin, sin, cos);
    let a2 = a * a;
    let b2 = b * b;

    // Quadratic part: R diag(b², a²) Rᵀ, i.e. a²b² R diag(1/a², 1/b²) Rᵀ.
    let quad = rot * na::Matrix2::from_diagonal(&na::Vector2::new(b2, a2)) * rot.transpose();
    let center = na::Vector2::new(x, y);
    let linear = -(quad * center);
    let constant = center.dot(&(quad * center)) - a2 * b2;

    let mut m = na::Matrix3::zeros();
    m.fixed_view_mut::<2, 2>(0, 0).copy_from(&quad);
    m.fixed_view_mut::<2, 1>(0, 2).copy_from(&linear);
    m.fixed_view_mut::<1, 2>(2, 0).copy_from(&linear.transpose());
    m[(2, 2)] = constant;
    m
}

pub(crate) fn check_ellipse_conditions<F: na::RealField + Copy>(
    matrix: &na::Matrix3<F>,
) -> Result<(), EllipseMatrixError> {
    let det = matrix.determinant();
    if det.abs() < F::default_epsilon() {
        return Err(EllipseMatrixError::Degenerate(det.to_subset_unchecked()));
    }

    // Ellipses (real or imaginary) have a positive-definite quadratic block.
    let discriminant = matrix.fixed_view::<2, 2>(0, 0).determinant();
    if discriminant <= F::zero() {
        return Err(EllipseMatrixError::NotAnEllipse(
            discriminant.to_subset_unchecked(),
        ));
    }

    Ok(())
}

/// Conic fitted in a normalized frame `p' = scale * (p - mean)`.
#[derive(Debug, Clone)]
pub struct NormalizedConic {
    pub matrix: na::Matrix3<f64>,
    pub mean: na::Vector2<f64>,
    pub scale: f64,
}

/// Direct least-squares ellipse fit (Fitzgibbon, Pilu & Fisher 1999).
///
/// Points are shifted to their centroid and scaled to a mean radius of √2 before building the
/// scatter matrix. The returned matrix lives in that normalized frame with a positive trace on
/// its quadratic block.
pub fn fit_normalized(points: &[[f64; 2]]) -> Result<NormalizedConic, EllipseMatrixError> {
    if points.len() < MIN_FIT_POINTS {
        return Err(EllipseMatrixError::TooFewPoints(points.len()));
    }

    let n = points.len() as f64;
    let mean = points
        .iter()
        .fold(na::Vector2::zeros(), |acc, p| acc + na::Vector2::new(p[0], p[1]))
        / n;
    let spread = points
        .iter()
        .map(|p| (na::Vector2::new(p[0], p[1]) - mean).norm())
        .sum::<f64>()
        / n;
    let scale = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        return Err(EllipseMatrixError::Degenerate(0.0));
    };

    let mut scatter = na::Matrix6::<f64>::zeros();
    for p in points {
        let x = (p[0] - mean.x) * scale;
        let y = (p[1] - mean.y) * scale;
        let row = na::Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        scatter += row * row.transpose();
    }

    let s11 = scatter.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = scatter.fixed_view::<3, 3>(0, 3).into_owned();
    let s22_inv = scatter
        .fixed_view::<3, 3>(3, 3)
        .into_owned()
        .try_inverse()
        .ok_or(EllipseMatrixError::NoEllipticSolution)?;
    let reduced = s11 - s12 * s22_inv * s12.transpose();

    // C1⁻¹ for the constraint 4AC - B² = 1.
    let c1_inv = na::Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);
    let system = c1_inv * reduced;

    let quadratic = eigen::real_eigenvalues(&system)
        .into_iter()
        .filter_map(|ev| {
            let v = eigen::null_vector(&(system - na::Matrix3::identity() * ev))?;
            (4.0 * v[0] * v[2] - v[1] * v[1] > 0.0).then_some((ev.abs(), v))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, v)| v)
        .ok_or(EllipseMatrixError::NoEllipticSolution)?;
    let linear = -(s22_inv * s12.transpose() * quadratic);

    let [a, b, c] = [quadratic[0], quadratic[1], quadratic[2]];
    let [d, e, f] = [linear[0], linear[1], linear[2]];
    let mut matrix = na::Matrix3::new(
        a,
        b / 2.0,
        d / 2.0,
        b / 2.0,
        c,
        e / 2.0,
        d / 2.0,
        e / 2.0,
        f,
    );
    if a + c < 0.0 {
        matrix = -matrix;
    }
    check_ellipse_conditions(&matrix)?;

    Ok(NormalizedConic {
        matrix,
        mean,
        scale,
    })
}
