//! Eigen-decomposition of symmetric 3×3 matrices.
//!
//! Local surface analysis only ever needs the spectrum of a covariance
//! matrix, so the capability is kept to this one shape. [`Jacobi`] is a
//! portable cyclic Jacobi rotation solver; [`NalgebraEigen`] delegates to
//! `nalgebra`'s implicit QR.

use nalgebra::{convert, Matrix3, Scalar, Vector3};

use crate::Real;

/// Eigenvalues in ascending order with the matching unit eigenvectors as
/// columns.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Eigen3<T: Scalar> {
    pub values: Vector3<T>,
    pub vectors: Matrix3<T>,
}

impl<T: Real> Eigen3<T> {
    fn sorted(values: Vector3<T>, vectors: Matrix3<T>) -> Self {
        let mut order = [0, 1, 2];
        order.sort_by(|&a, &b| {
            values[a]
                .partial_cmp(&values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Eigen3 {
            values: Vector3::from_fn(|i, _| values[order[i]]),
            vectors: Matrix3::from_fn(|r, c| vectors[(r, order[c])]),
        }
    }

    /// The smallest eigenvalue and its eigenvector.
    #[inline]
    pub fn smallest(&self) -> (T, Vector3<T>) {
        (self.values.x, self.vectors.column(0).into_owned())
    }

    /// The largest eigenvalue and its eigenvector.
    #[inline]
    pub fn largest(&self) -> (T, Vector3<T>) {
        (self.values.z, self.vectors.column(2).into_owned())
    }
}

pub trait SymmetricEigen3<T: Scalar> {
    /// Decomposes `matrix`, which must be symmetric. Only its upper triangle
    /// may be read. Returns `None` for non-finite input.
    fn eigen(&self, matrix: &Matrix3<T>) -> Option<Eigen3<T>>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Jacobi {
    pub max_sweeps: usize,
}

impl Default for Jacobi {
    fn default() -> Self {
        Jacobi { max_sweeps: 32 }
    }
}

impl<T: Real> SymmetricEigen3<T> for Jacobi {
    fn eigen(&self, matrix: &Matrix3<T>) -> Option<Eigen3<T>> {
        if !matrix.iter().all(|x| x.is_finite()) {
            return None;
        }

        let mut a = *matrix;
        a.fill_lower_triangle_with_upper_triangle();
        let mut v = Matrix3::identity();

        let total = a.norm_squared();
        let tolerance = T::default_epsilon() * T::default_epsilon() * total;
        let half = convert::<_, T>(0.5);

        for _ in 0..self.max_sweeps {
            let off = a.m12 * a.m12 + a.m13 * a.m13 + a.m23 * a.m23;
            if off <= tolerance {
                break;
            }

            for (p, q) in [(0, 1), (0, 2), (1, 2)] {
                let apq = a[(p, q)];
                if apq == T::zero() {
                    continue;
                }

                let theta = (a[(q, q)] - a[(p, p)]) * half / apq;
                let root = (theta * theta + T::one()).sqrt();
                let t = if theta >= T::zero() {
                    T::one() / (theta + root)
                } else {
                    -T::one() / (root - theta)
                };
                let c = T::one() / (t * t + T::one()).sqrt();
                let s = t * c;

                let mut rotation = Matrix3::identity();
                rotation[(p, p)] = c;
                rotation[(q, q)] = c;
                rotation[(p, q)] = s;
                rotation[(q, p)] = -s;

                a = rotation.transpose() * a * rotation;
                a[(p, q)] = T::zero();
                a[(q, p)] = T::zero();
                v *= rotation;
            }
        }

        Some(Eigen3::sorted(a.diagonal(), v))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct NalgebraEigen;

impl<T: Real> SymmetricEigen3<T> for NalgebraEigen {
    fn eigen(&self, matrix: &Matrix3<T>) -> Option<Eigen3<T>> {
        if !matrix.iter().all(|x| x.is_finite()) {
            return None;
        }
        let decomposition = matrix.symmetric_eigen();
        Some(Eigen3::sorted(
            decomposition.eigenvalues,
            decomposition.eigenvectors,
        ))
    }
}
