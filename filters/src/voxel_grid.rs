use nalgebra::{convert, Scalar, Vector3};
use pcr_common::{filter::ApproxFilter, Real};
use rayon::prelude::*;

/// Replaces the points falling in each cubic voxel by their centroid.
///
/// Voxels are keyed by `floor(coordinate / voxel_size)` on a grid anchored at
/// the origin, so the same space is cut the same way regardless of the
/// input's extent. The output is ordered by voxel key. Non-finite points are
/// dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VoxelGrid<T: Scalar> {
    voxel_size: T,
}

impl<T: Real> VoxelGrid<T> {
    /// # Panics
    ///
    /// Panics if `voxel_size` is not a positive finite number.
    pub fn new(voxel_size: T) -> Self {
        assert!(
            voxel_size > T::zero() && voxel_size.is_finite(),
            "The voxel size must be positive and finite"
        );
        VoxelGrid { voxel_size }
    }

    #[inline]
    pub fn voxel_size(&self) -> T {
        self.voxel_size
    }

    fn index(&self, coords: &Vector3<T>) -> Option<[i64; 3]> {
        let x = (coords.x / self.voxel_size).floor().to_i64()?;
        let y = (coords.y / self.voxel_size).floor().to_i64()?;
        let z = (coords.z / self.voxel_size).floor().to_i64()?;
        Some([x, y, z])
    }
}

impl<T: Real> ApproxFilter<[Vector3<T>]> for VoxelGrid<T> {
    type Output = Vec<Vector3<T>>;

    fn filter(&mut self, input: &[Vector3<T>]) -> Vec<Vector3<T>> {
        let mut index_point = { input.par_iter() }
            .filter_map(|coords| Some((self.index(coords)?, coords)))
            .collect::<Vec<_>>();

        // Stable, so each centroid sums its points in input order.
        index_point.par_sort_by(|(i1, _), (i2, _)| i1.cmp(i2));

        let mut storage = Vec::with_capacity(index_point.len() / 3);
        let mut iter = index_point.into_iter().peekable();
        while let Some((index, coords)) = iter.next() {
            let mut sum = *coords;
            let mut num = 1usize;
            while let Some((_, coords)) = iter.next_if(|(next, _)| *next == index) {
                sum += coords;
                num += 1;
            }
            storage.push(sum.unscale(convert::<f64, T>(num as f64)));
        }
        storage
    }
}
