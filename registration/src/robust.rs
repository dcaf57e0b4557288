use pcr_common::Real;

/// Robust loss used to reweight ICP residuals.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum RobustKernel<T> {
    /// Plain least squares.
    #[default]
    None,

    /// Quadratic up to the threshold, linear beyond it.
    Huber(T),
}

impl<T: Real> RobustKernel<T> {
    /// The IRLS weight of `residual`, in `(0, 1]`.
    pub fn weight(&self, residual: T) -> T {
        let abs_r = residual.abs();

        match *self {
            RobustKernel::None => T::one(),
            RobustKernel::Huber(threshold) => {
                if abs_r <= threshold {
                    T::one()
                } else {
                    threshold / abs_r
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_huber() {
        let kernel = RobustKernel::Huber(0.04);
        assert_eq!(kernel.weight(0.01), 1.);
        assert_eq!(kernel.weight(-0.04), 1.);
        assert_relative_eq!(kernel.weight(0.08), 0.5);
        assert_relative_eq!(kernel.weight(-0.16), 0.25);
        assert_eq!(RobustKernel::None.weight(100.), 1.);
    }
}
