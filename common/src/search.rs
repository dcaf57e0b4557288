use nalgebra::{Scalar, Vector3};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SearchType<T> {
    Knn(usize),
    Radius(T),
}

/// A neighbor lookup structure over a fixed set of points.
///
/// All distances reported are squared Euclidean distances.
pub trait Search<T: Scalar> {
    fn points(&self) -> &[Vector3<T>];

    /// The closest indexed point to `pivot` with its squared distance.
    fn nearest(&self, pivot: &Vector3<T>) -> Option<(usize, T)>;

    /// Fills `result` with `(index, squared distance)` pairs sorted by
    /// ascending distance.
    fn search(&self, pivot: &Vector3<T>, ty: SearchType<T>, result: &mut Vec<(usize, T)>);
}
