mod bound;
mod moments;

use std::ops::{Deref, Index};

use nalgebra::{Scalar, Vector3};

pub use self::{bound::Bound, moments::centroid_and_cov_matrix};
use crate::{pose::Transform, Real};

/// An unorganized point cloud produced at one resolution level.
///
/// The normals, when present, are parallel to the points. The cloud is
/// immutable once built: every operation that changes the geometry returns a
/// new cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud<T: Scalar> {
    points: Vec<Vector3<T>>,
    normals: Option<Vec<Vector3<T>>>,
    voxel_size: T,
    bound: Option<Bound<T>>,
    up: Vector3<T>,
}

impl<T: Real> PointCloud<T> {
    pub fn from_points(points: Vec<Vector3<T>>, voxel_size: T, up: Vector3<T>) -> Self {
        let bound = Bound::from_points(&points);
        PointCloud {
            points,
            normals: None,
            voxel_size,
            bound,
            up,
        }
    }

    /// Attaches per-point normals, handing them back if their count doesn't
    /// match the number of points.
    pub fn try_with_normals(self, normals: Vec<Vector3<T>>) -> Result<Self, Vec<Vector3<T>>> {
        if normals.len() == self.points.len() {
            Ok(PointCloud {
                normals: Some(normals),
                ..self
            })
        } else {
            Err(normals)
        }
    }

    #[inline]
    pub fn with_normals(self, normals: Vec<Vector3<T>>) -> Self {
        self.try_with_normals(normals)
            .expect("The number of normals must match the number of points")
    }

    /// Maps every point (and normal) through `z`. The bound is recomputed.
    pub fn transformed<Z: Transform<T>>(&self, z: &Z) -> Self {
        let points = self.points.iter().map(|p| z.se3(p)).collect::<Vec<_>>();
        let normals = { self.normals.as_ref() }
            .map(|normals| normals.iter().map(|n| z.so3(n)).collect());
        let bound = Bound::from_points(&points);
        PointCloud {
            points,
            normals,
            voxel_size: self.voxel_size,
            bound,
            up: self.up,
        }
    }

    /// Like [`PointCloud::transformed`], but only for the points, reusing the
    /// allocation of `out`.
    pub fn transform_into<Z: Transform<T>>(&self, z: &Z, out: &mut Vec<Vector3<T>>) {
        out.clear();
        out.extend(self.points.iter().map(|p| z.se3(p)));
    }
}

impl<T: Scalar> PointCloud<T> {
    #[inline]
    pub fn points(&self) -> &[Vector3<T>] {
        &self.points
    }

    #[inline]
    pub fn normals(&self) -> Option<&[Vector3<T>]> {
        self.normals.as_deref()
    }

    #[inline]
    pub fn normal(&self, index: usize) -> Option<&Vector3<T>> {
        self.normals.as_ref().map(|normals| &normals[index])
    }

    #[inline]
    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    #[inline]
    pub fn voxel_size(&self) -> T {
        self.voxel_size.clone()
    }

    /// `None` if and only if the cloud holds no finite point.
    #[inline]
    pub fn bound(&self) -> Option<&Bound<T>> {
        self.bound.as_ref()
    }

    #[inline]
    pub fn up(&self) -> &Vector3<T> {
        &self.up
    }
}

impl<T: Scalar> Deref for PointCloud<T> {
    type Target = [Vector3<T>];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.points
    }
}

impl<T: Scalar> Index<usize> for PointCloud<T> {
    type Output = Vector3<T>;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}
