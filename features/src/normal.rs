use nalgebra::{Scalar, Vector3};
use pcr_common::{
    eigen::{Jacobi, SymmetricEigen3},
    feature::Feature,
    point_cloud::centroid_and_cov_matrix,
    search::{Search, SearchType},
    Real,
};
use rayon::prelude::*;

/// Surface normals by local principal component analysis.
///
/// Each point's normal is the eigenvector of the smallest eigenvalue of its
/// neighborhood's covariance, flipped so that `dot(normal, up) >= 0`. A point
/// whose neighborhood (the point itself included) holds fewer than
/// `min_neighbors` points, or whose covariance can't be decomposed, gets `up`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NormalEstimation<T: Scalar, E = Jacobi> {
    pub up: Vector3<T>,
    pub min_neighbors: usize,
    pub solver: E,
}

impl<T: Real> NormalEstimation<T> {
    pub fn new(up: Vector3<T>) -> Self {
        NormalEstimation {
            up,
            min_neighbors: 3,
            solver: Jacobi::default(),
        }
    }
}

impl<T: Real, E> NormalEstimation<T, E> {
    pub fn with_solver<F>(self, solver: F) -> NormalEstimation<T, F> {
        NormalEstimation {
            up: self.up,
            min_neighbors: self.min_neighbors,
            solver,
        }
    }

    pub fn with_min_neighbors(self, min_neighbors: usize) -> Self {
        NormalEstimation {
            min_neighbors,
            ..self
        }
    }
}

impl<T: Real, E: SymmetricEigen3<T>> NormalEstimation<T, E> {
    fn normal<S: Search<T> + ?Sized>(&self, search: &S, neighbors: &[(usize, T)]) -> Vector3<T> {
        if neighbors.len() < self.min_neighbors.max(1) {
            return self.up;
        }

        let points = search.points();
        let (moments, _) = centroid_and_cov_matrix(neighbors.iter().map(|&(i, _)| &points[i]));
        let normal = { moments.and_then(|(_, cov)| self.solver.eigen(&cov)) }
            .map(|eigen| eigen.smallest().1)
            .and_then(|n| n.try_normalize(T::default_epsilon()));

        match normal {
            Some(n) if n.dot(&self.up) < T::zero() => -n,
            Some(n) => n,
            None => self.up,
        }
    }
}

impl<T, E, S> Feature<[Vector3<T>], Vec<Vector3<T>>, S, SearchType<T>> for NormalEstimation<T, E>
where
    T: Real,
    E: SymmetricEigen3<T> + Sync,
    S: Search<T> + Sync + ?Sized,
{
    fn compute(&self, input: &[Vector3<T>], search: &S, search_param: SearchType<T>) -> Vec<Vector3<T>> {
        { input.par_iter() }
            .map_init(Vec::new, |result, point| {
                search.search(point, search_param, result);
                self.normal(search, result)
            })
            .collect()
    }
}
