use nalgebra::{convert, Scalar, Vector3};

use crate::Real;

/// An axis-aligned bounding box, `min <= max` componentwise.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bound<T: Scalar> {
    pub min: Vector3<T>,
    pub max: Vector3<T>,
}

impl<T: Real> Bound<T> {
    /// Builds the box spanned by two arbitrary corners.
    pub fn new(a: Vector3<T>, b: Vector3<T>) -> Self {
        Bound {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// The bound of all finite points, `None` if there is none.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Vector3<T>>,
        T: 'a,
    {
        { points.into_iter() }
            .filter(|p| p.iter().all(|x| x.is_finite()))
            .fold(None, |acc, p| match acc {
                None => Some(Bound { min: *p, max: *p }),
                Some(Bound { min, max }) => Some(Bound {
                    min: min.inf(p),
                    max: max.sup(p),
                }),
            })
    }

    #[inline]
    pub fn center(&self) -> Vector3<T> {
        (self.min + self.max) * convert::<_, T>(0.5)
    }

    #[inline]
    pub fn extent(&self) -> Vector3<T> {
        self.max - self.min
    }

    pub fn contains(&self, point: &Vector3<T>) -> bool {
        self.min <= *point && *point <= self.max
    }

    pub fn is_finite(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|x| x.is_finite())
    }
}
