use crate::math::conic;
use nalgebra as na;
use std::fmt::Debug;
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanarEllipseError {
    #[error("No center coordinates found: {0}")]
    NoCenterCoordinates(&'static str),
}

/// Defines the behavior of an ellipse representation
pub trait EllipseRepr: Debug {
    /// Underlying scalar, [f32], [f64] or any other [na::RealField].
    type F: na::RealField + Copy;

    /// Returns the semi-major axis length
    fn semi_major(&self) -> Self::F;

    /// Returns the semi-minor axis length
    fn semi_minor(&self) -> Self::F;

    /// Direction of the major axis in radians, measured from +x towards +y.
    fn rotation(&self) -> Self::F;

    /// Returns the center coordinates
    fn center(&self) -> Result<(Self::F, Self::F), PlanarEllipseError>;

    fn get_parametric(&self) -> Result<Parametric<Self::F>, PlanarEllipseError> {
        let (x, y) = self.center()?;
        Ok(Parametric::<Self::F> {
            a: self.semi_major(),
            b: self.semi_minor(),
            theta: self.rotation(),
            x,
            y,
        })
    }

    fn to_matrix(&self) -> na::Matrix3<Self::F>;
}

/// Parametric representation of an ellipse in a 2D plane.
#[derive(Debug, Clone)]
pub struct Parametric<F: na::RealField + Copy> {
    /// Semi-major axis
    a: F,
    /// Semi-minor axis
    b: F,
    /// Rotation in radians
    theta: F,
    x: F,
    y: F,
}

/// Ellipse stored as the 3x3 matrix of its conic section [1].
///
/// [1] https://en.wikipedia.org/wiki/Matrix_representation_of_conic_sections
#[derive(Debug, Clone)]
pub struct Quadratic<F: na::RealField>(na::Matrix3<F>);

impl<F: na::RealField + Copy> Quadratic<F> {
    /// Semi-axes from the eigenvalues of the quadratic block, rescaled by `-det(M)/det(A33)`.
    fn semi_axes(&self) -> (F, F) {
        let block = self.0.fixed_view::<2, 2>(0, 0);
        let k = -self.0.determinant() / block.determinant();
        let eig = block.symmetric_eigenvalues();
        let (l0, l1) = (eig[0] / k, eig[1] / k);
        let (r0, r1) = ((F::one() / l0).sqrt(), (F::one() / l1).sqrt());
        if r0 >= r1 {
            (r0, r1)
        } else {
            (r1, r0)
        }
    }
}

impl<F: na::RealField + Copy> EllipseRepr for Parametric<F> {
    type F = F;
    fn semi_major(&self) -> F {
        self.a
    }
    fn semi_minor(&self) -> F {
        self.b
    }
    fn rotation(&self) -> F {
        self.theta
    }
    fn center(&self) -> Result<(F, F), PlanarEllipseError> {
        Ok((self.x, self.y))
    }
    fn to_matrix(&self) -> na::Matrix3<F> {
        conic::compute_matrix(self.a, self.b, self.theta, self.x, self.y)
    }
}

impl<F: na::RealField + Copy> EllipseRepr for Quadratic<F> {
    // https://linux-blog.anracom.com/2023/09/04/properties-of-ellipses-by-matrix-coefficients-i-two-defining-matrices/
    type F = F;
    fn semi_major(&self) -> F {
        self.semi_axes().0
    }

    fn semi_minor(&self) -> F {
        self.semi_axes().1
    }

    fn rotation(&self) -> F {
        let two = F::one() + F::one();
        let half_b = self.0[(0, 1)];
        let diff = self.0[(1, 1)] - self.0[(0, 0)];
        -F::atan2(two * half_b, diff) / two
    }

    fn center(&self) -> Result<(F, F), PlanarEllipseError> {
        let inv = self
            .0
            .fixed_view::<2, 2>(0, 0)
            .try_inverse()
            .ok_or(PlanarEllipseError::NoCenterCoordinates(
                "Matrix is not invertible.",
            ))?;
        let c = -(inv * self.0.fixed_view::<2, 1>(0, 2));
        Ok((c[0], c[1]))
    }

    fn to_matrix(&self) -> na::Matrix3<F> {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct PlanarEllipse<R: EllipseRepr>(R);

impl<F: na::RealField + Copy> PlanarEllipse<Parametric<F>> {
    /// Semi-axes are reordered so that `a >= b`; `theta` then follows the new major axis and is
    /// wrapped into `(-pi/2, pi/2]`.
    pub fn from_parameters(a: F, b: F, theta: F, x: F, y: F) -> Self {
        if b > a {
            let mut theta = theta + F::frac_pi_2();
            while theta.is_finite() && theta > F::frac_pi_2() {
                theta = theta - F::pi();
            }
            while theta.is_finite() && theta <= -F::frac_pi_2() {
                theta = theta + F::pi();
            }
            return Self(Parametric { a: b, b: a, theta, x, y });
        }
        Self(Parametric { a, b, theta, x, y })
    }

    /// `n` points evenly spaced in the eccentric anomaly, starting at the major-axis vertex.
    pub fn sample_boundary(&self, n: usize) -> Vec<na::Point2<F>> {
        let Parametric { a, b, theta, x, y } = self.0;
        let (sin, cos) = theta.sin_cos();
        (0..n)
            .map(|i| {
                let t = F::two_pi() * F::from_usize(i).unwrap_or_else(F::zero)
                    / F::from_usize(n.max(1)).unwrap_or_else(F::one);
                let (u, v) = (a * t.cos(), b * t.sin());
                na::Point2::new(x + u * cos - v * sin, y + u * sin + v * cos)
            })
            .collect()
    }
}

impl PlanarEllipse<Parametric<f64>> {
    /// Least-squares ellipse through a set of boundary points, in the points' own frame.
    pub fn fit_points(points: &[[f64; 2]]) -> Result<Self, crate::Error> {
        let fit = conic::fit_normalized(points)?;
        let normalized =
            PlanarEllipse::<Quadratic<f64>>::try_from_matrix(fit.matrix)?.try_into_parametric()?;
        let Parametric { a, b, theta, x, y } = normalized.0;
        Ok(Self::from_parameters(
            a / fit.scale,
            b / fit.scale,
            theta,
            fit.mean.x + x / fit.scale,
            fit.mean.y + y / fit.scale,
        ))
    }
}

impl<F: na::RealField + Copy> PlanarEllipse<Quadratic<F>> {
    pub fn try_from_matrix(matrix: na::Matrix3<F>) -> Result<Self, crate::Error> {
        conic::check_ellipse_conditions(&matrix)?;
        Ok(Self(Quadratic(matrix)))
    }

    pub fn try_into_parametric(self) -> Result<PlanarEllipse<Parametric<F>>, PlanarEllipseError> {
        let Parametric { a, b, theta, x, y } = self.0.get_parametric()?;
        Ok(PlanarEllipse::<Parametric<F>>::from_parameters(
            a, b, theta, x, y,
        ))
    }
}

impl<R: EllipseRepr> AsRef<R> for PlanarEllipse<R> {
    fn as_ref(&self) -> &R {
        &self.0
    }
}

impl<R: EllipseRepr> Deref for PlanarEllipse<R> {
    type Target = R;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
