use nalgebra::{Scalar, Vector3};
use pcr_common::{filter::Filter, Real};

/// Keeps the points whose distance from `origin` lies in `[min, max]`.
///
/// Non-finite points never pass.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RangeFilter<T: Scalar> {
    pub origin: Vector3<T>,
    pub min: T,
    pub max: T,
}

impl<T: Real> RangeFilter<T> {
    pub fn new(origin: Vector3<T>, min: T, max: T) -> Self {
        RangeFilter { origin, min, max }
    }

    #[inline]
    fn keeps(&self, point: &Vector3<T>) -> bool {
        let distance = (point - self.origin).norm();
        distance.is_finite() && self.min <= distance && distance <= self.max
    }
}

impl<T: Real> Filter<[Vector3<T>]> for RangeFilter<T> {
    fn filter_indices(&mut self, input: &[Vector3<T>]) -> Vec<usize> {
        let mut indices = (0..input.len()).collect::<Vec<_>>();
        indices.retain(|&index| self.keeps(&input[index]));
        indices
    }

    fn filter_all_indices(&mut self, input: &[Vector3<T>]) -> (Vec<usize>, Vec<usize>) {
        let mut indices = (0..input.len()).collect::<Vec<_>>();
        let mut removed = Vec::with_capacity(indices.len());
        indices.retain(|&index| {
            let ret = self.keeps(&input[index]);
            if !ret {
                removed.push(index);
            }
            ret
        });
        (indices, removed)
    }
}

/// Keeps the points whose per-point confidence is at least `min`.
///
/// `confidence` is parallel to the filtered points; points past its end are
/// dropped.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ConfidenceFilter<'a, T> {
    pub confidence: &'a [T],
    pub min: T,
}

impl<'a, T> ConfidenceFilter<'a, T> {
    pub fn new(confidence: &'a [T], min: T) -> Self {
        ConfidenceFilter { confidence, min }
    }
}

impl<'a, T: Real> Filter<[Vector3<T>]> for ConfidenceFilter<'a, T> {
    fn filter_indices(&mut self, input: &[Vector3<T>]) -> Vec<usize> {
        let mut indices = (0..input.len().min(self.confidence.len())).collect::<Vec<_>>();
        indices.retain(|&index| self.confidence[index] >= self.min);
        indices
    }
}
