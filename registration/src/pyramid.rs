//! Multi-resolution preprocessing: range and confidence filtering, voxel
//! downsampling and normal estimation, once per voxel size.

use log::debug;
use nalgebra::{convert, Scalar, Vector3};
use pcr_common::{
    eigen::{Jacobi, SymmetricEigen3},
    feature::Feature,
    filter::{ApproxFilter, Filter},
    point_cloud::PointCloud,
    search::SearchType,
    Real,
};
use pcr_features::NormalEstimation;
use pcr_filters::{ConfidenceFilter, RangeFilter, VoxelGrid};
use pcr_search::GridIndex;

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessParams<T: Scalar> {
    /// Coarse to fine.
    pub voxel_sizes: Vec<T>,
    /// Accepted `[min, max]` distance from `sensor_origin`; `None` keeps
    /// every finite point.
    pub range: Option<(T, T)>,
    pub sensor_origin: Vector3<T>,
    /// Points whose confidence is below this are dropped. Only applies when
    /// a confidence signal is supplied.
    pub min_confidence: Option<T>,
    /// Normals are fitted over neighbors closer than this many voxels.
    pub normal_radius_factor: T,
    /// Below this many neighbors (the point included) the normal falls back
    /// to the up vector.
    pub min_normal_neighbors: usize,
}

impl<T: Real> PreprocessParams<T> {
    /// Parameters for live captures: points closer than 10 cm or farther
    /// than 5 m from the sensor are dropped.
    pub fn scan(voxel_sizes: Vec<T>) -> Self {
        PreprocessParams {
            voxel_sizes,
            range: Some((convert(0.1), convert(5.0))),
            sensor_origin: Vector3::zeros(),
            min_confidence: None,
            normal_radius_factor: convert(3.0),
            min_normal_neighbors: 3,
        }
    }

    /// Parameters for a static reference, which has no sensor distance.
    pub fn model(voxel_sizes: Vec<T>) -> Self {
        PreprocessParams {
            range: None,
            ..Self::scan(voxel_sizes)
        }
    }

    pub fn with_range(self, range: Option<(T, T)>) -> Self {
        PreprocessParams { range, ..self }
    }

    pub fn with_sensor_origin(self, sensor_origin: Vector3<T>) -> Self {
        PreprocessParams {
            sensor_origin,
            ..self
        }
    }

    pub fn with_min_confidence(self, min_confidence: Option<T>) -> Self {
        PreprocessParams {
            min_confidence,
            ..self
        }
    }
}

/// Builds one [`PointCloud`] per voxel size, each carrying normals oriented
/// towards `up`.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidBuilder<T: Scalar, E = Jacobi> {
    params: PreprocessParams<T>,
    solver: E,
}

impl<T: Real> PyramidBuilder<T> {
    pub fn new(params: PreprocessParams<T>) -> Self {
        PyramidBuilder {
            params,
            solver: Jacobi::default(),
        }
    }
}

impl<T: Real, E> PyramidBuilder<T, E> {
    pub fn with_solver<F>(self, solver: F) -> PyramidBuilder<T, F> {
        PyramidBuilder {
            params: self.params,
            solver,
        }
    }

    #[inline]
    pub fn params(&self) -> &PreprocessParams<T> {
        &self.params
    }
}

impl<T: Real, E: SymmetricEigen3<T> + Clone + Sync> PyramidBuilder<T, E> {
    /// The points that survive the range and confidence filters, in input
    /// order.
    pub fn filter(&self, raw: &[Vector3<T>], confidence: Option<&[T]>) -> Vec<Vector3<T>> {
        let mut indices = match self.params.range {
            Some((min, max)) => {
                RangeFilter::new(self.params.sensor_origin, min, max).filter_indices(raw)
            }
            None => {
                let mut finite = |point: &Vector3<T>| point.iter().all(|x| x.is_finite());
                finite.filter_indices(raw)
            }
        };

        if let (Some(confidence), Some(min)) = (confidence, self.params.min_confidence) {
            let passed = ConfidenceFilter::new(confidence, min).filter_indices(raw);
            indices.retain(|index| passed.binary_search(index).is_ok());
        }

        indices.into_iter().map(|index| raw[index]).collect()
    }

    /// Downsamples already filtered points at `voxel_size` and estimates
    /// their normals.
    pub fn level(&self, filtered: &[Vector3<T>], voxel_size: T, up: &Vector3<T>) -> PointCloud<T> {
        let points = VoxelGrid::new(voxel_size).filter(filtered);

        let radius = voxel_size * self.params.normal_radius_factor;
        let grid = GridIndex::new(&points, radius);
        let estimation = NormalEstimation::new(*up)
            .with_min_neighbors(self.params.min_normal_neighbors)
            .with_solver(self.solver.clone());
        let normals = estimation.compute(&points[..], &grid, SearchType::Radius(radius));

        PointCloud::from_points(points, voxel_size, *up).with_normals(normals)
    }

    /// The whole pyramid, coarse to fine.
    ///
    /// # Panics
    ///
    /// Panics if a voxel size is not a positive finite number.
    pub fn build(
        &self,
        raw: &[Vector3<T>],
        confidence: Option<&[T]>,
        up: &Vector3<T>,
    ) -> Vec<PointCloud<T>> {
        let filtered = self.filter(raw, confidence);
        debug!(
            "Preprocessing: {} of {} raw points kept by filters",
            filtered.len(),
            raw.len()
        );

        { self.params.voxel_sizes.iter() }
            .map(|&voxel_size| {
                let level = self.level(&filtered, voxel_size, up);
                debug!(
                    "Preprocessing: {} points at voxel size {:?}",
                    level.len(),
                    voxel_size
                );
                level
            })
            .collect()
    }
}

/// Shorthand for [`PyramidBuilder::build`] with the default eigensolver.
pub fn build_pyramid<T: Real>(
    raw: &[Vector3<T>],
    up: &Vector3<T>,
    params: &PreprocessParams<T>,
) -> Vec<PointCloud<T>> {
    PyramidBuilder::new(params.clone()).build(raw, None, up)
}
